//! Subscription routing.
//!
//! The router is a single worker thread that exclusively owns the
//! [`registry::Registry`]. Sessions talk to it over a bounded control channel;
//! the forwarder feeds it changed paths. Nothing else touches the registry.

/// Path → wake-signal map.
pub(crate) mod registry;
/// Router worker loop and control messages.
pub(crate) mod worker;

pub(crate) use worker::{router_loop, ControlMsg, RouterContext};

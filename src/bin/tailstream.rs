//! tailstream - follow files from the command line or serve them over TCP

use std::io::{stdout, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tailstream::transport::TcpStreamServer;
use tailstream::{FileSource, Listener, Streamer, StreamerConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tailstream")]
#[command(about = "Stream appended file data as it is written")]
#[command(version)]
struct Args {
    /// Path to a JSON engine configuration file
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (overrides TAILSTREAM_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a file, writing its contents to stdout
    Follow {
        /// File to follow
        file: PathBuf,

        /// Byte offset to start from
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Stop after this many seconds without changes (0 follows forever)
        #[arg(long, value_name = "SECS", default_value_t = 0)]
        timeout: u64,

        /// Print what is there now and exit
        #[arg(long)]
        once: bool,
    },
    /// Serve files under a directory over raw TCP
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:4444")]
        addr: String,

        /// Directory whose files may be requested
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Per-connection idle timeout in seconds (0 disables)
        #[arg(long, value_name = "SECS", default_value_t = 60)]
        timeout: u64,
    },
}

fn parse_level(verbose: bool) -> tracing::Level {
    if verbose {
        return tracing::Level::DEBUG;
    }
    match std::env::var("TAILSTREAM_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .to_ascii_lowercase()
        .as_str()
    {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout carries file data only.
    tracing_subscriber::fmt()
        .with_max_level(parse_level(args.verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = match &args.config {
        Some(path) => StreamerConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => StreamerConfig::default(),
    };

    let streamer = Streamer::new(cfg);
    streamer.start().context("Failed to start streamer")?;

    let outcome = match args.command {
        Command::Follow {
            file,
            offset,
            timeout,
            once,
        } => follow(&streamer, &file, offset, Duration::from_secs(timeout), once),
        Command::Serve { addr, root, timeout } => serve(&streamer, &addr, &root, Duration::from_secs(timeout)),
    };

    streamer.stop().context("Failed to stop streamer")?;
    outcome
}

fn follow(streamer: &Streamer, file: &Path, offset: u64, idle: Duration, once: bool) -> Result<()> {
    let source = FileSource::open_at(file, offset).with_context(|| format!("Can't open {}", file.display()))?;
    let listener = Listener::new(source, BufWriter::new(stdout()));
    if once {
        listener.close();
    }
    let end = streamer
        .stream_to(&listener, idle)
        .with_context(|| format!("Streaming {} failed", file.display()))?;
    info!(reason = ?end, "follow finished");
    Ok(())
}

fn serve(streamer: &Streamer, addr: &str, root: &Path, idle: Duration) -> Result<()> {
    let server = TcpStreamServer::bind(addr, root, idle).with_context(|| format!("Failed to listen on {addr}"))?;
    info!("Listening on {}", server.local_addr()?);
    server.serve(streamer)?;
    Ok(())
}

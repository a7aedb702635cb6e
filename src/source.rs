//! Byte sources and sinks for stream sessions.
//!
//! A [`Source`] is read from its current cursor to its current end on every
//! wake; it never rereads from the start. A [`Sink`] is a buffered writer whose
//! buffering capacity sizes the session's copy buffer.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Named, seekable, readable byte source.
pub trait Source: Read + Send {
    /// Path this source is watched under.
    fn path(&self) -> &Path;

    /// Re-anchor the read cursor at its current position so a read can
    /// continue past a previously observed end.
    fn resume(&mut self) -> io::Result<()>;

    /// Whether the path still names the same underlying object.
    fn still_exists(&self) -> bool;
}

/// Buffered writer that reports its buffering capacity.
pub trait Sink: Write + Send {
    /// Available plus already buffered bytes.
    fn buffer_capacity(&self) -> usize;
}

impl<W: Write + Send> Sink for BufWriter<W> {
    fn buffer_capacity(&self) -> usize {
        self.capacity()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    // Without inode numbers only presence can be checked.
    #[cfg(not(unix))]
    fn of(_meta: &std::fs::Metadata) -> Self {
        Self {}
    }
}

/// A file opened for streaming.
///
/// The path is canonicalised on open so it matches the paths reported by
/// filesystem notifications.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
    identity: FileIdentity,
}

impl FileSource {
    /// Open `path` and stream from its beginning.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_at(path, 0)
    }

    /// Open `path` and stream from byte `offset`.
    pub fn open_at(path: impl AsRef<Path>, offset: u64) -> io::Result<Self> {
        let path = std::fs::canonicalize(path.as_ref())?;
        let mut file = File::open(&path)?;
        let identity = FileIdentity::of(&file.metadata()?);
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(Self { file, path, identity })
    }

    /// Current read position.
    pub fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Source for FileSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn resume(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Current(0)).map(|_| ())
    }

    fn still_exists(&self) -> bool {
        match std::fs::metadata(&self.path) {
            Ok(meta) => FileIdentity::of(&meta) == self.identity,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_at_skips_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"hello world").unwrap();

        let mut src = FileSource::open_at(&path, 6).unwrap();
        let mut out = String::new();
        src.read_to_string(&mut out).unwrap();
        assert_eq!(out, "world");
        assert_eq!(src.position().unwrap(), 11);
    }

    #[test]
    fn resume_reads_appended_bytes_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"abc").unwrap();

        let mut src = FileSource::open(&path).unwrap();
        let mut out = Vec::new();
        src.read_to_end(&mut out).unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"def").unwrap();

        src.resume().unwrap();
        let mut more = Vec::new();
        src.read_to_end(&mut more).unwrap();
        assert_eq!(more, b"def");
    }

    #[test]
    fn path_is_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"").unwrap();
        let src = FileSource::open(dir.path().join(".").join("a.log")).unwrap();
        assert_eq!(src.path(), std::fs::canonicalize(&path).unwrap());
    }

    #[test]
    fn deleted_file_no_longer_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"x").unwrap();
        let src = FileSource::open(&path).unwrap();
        assert!(src.still_exists());
        std::fs::remove_file(&path).unwrap();
        assert!(!src.still_exists());
    }

    #[cfg(unix)]
    #[test]
    fn rotated_file_no_longer_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"old").unwrap();
        let src = FileSource::open(&path).unwrap();

        std::fs::rename(&path, dir.path().join("a.log.1")).unwrap();
        std::fs::write(&path, b"new").unwrap();
        assert!(!src.still_exists());
    }

    #[test]
    fn bufwriter_reports_capacity() {
        let sink = BufWriter::with_capacity(4096, Vec::<u8>::new());
        assert_eq!(sink.buffer_capacity(), 4096);
    }
}

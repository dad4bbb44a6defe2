//! Output sinks for formatted records.
//!
//! A [`Writer`] takes `&self` so one instance can be shared by every worker.
//! Implementations here lock internally, which makes them safe to call
//! concurrently even when the dispatcher's own serialization is disabled.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lz4_flex::frame::FrameEncoder;
use parking_lot::Mutex;
use tracing_appender::rolling::{self, RollingFileAppender};

/// Destination for formatted bytes.
pub trait Writer: Send + Sync {
    /// Writes some prefix of `buf`, returning how many bytes were accepted.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    /// Flushes and releases the sink. Called once when the logger closes.
    fn close(&self) -> io::Result<()> {
        self.flush()
    }
}

impl<W: Writer + ?Sized> Writer for Arc<W> {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        (**self).write_all(buf)
    }

    fn flush(&self) -> io::Result<()> {
        (**self).flush()
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }
}

/// Adapts any `std::io::Write` into a [`Writer`] behind a mutex.
#[derive(Debug)]
pub struct IoWriter<W: io::Write + Send> {
    inner: Mutex<W>,
}

impl<W: io::Write + Send> IoWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

impl IoWriter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl IoWriter<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl IoWriter<File> {
    /// Opens `path` for appending, creating it if needed.
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: io::Write + Send> Writer for IoWriter<W> {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut *self.inner.lock(), buf)
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut *self.inner.lock(), buf)
    }

    fn flush(&self) -> io::Result<()> {
        io::Write::flush(&mut *self.inner.lock())
    }
}

/// Wraps `inner` in a `BufWriter` of `capacity` bytes.
pub fn buffered<W: io::Write + Send>(inner: W, capacity: usize) -> IoWriter<BufWriter<W>> {
    IoWriter::new(BufWriter::with_capacity(capacity, inner))
}

/// File writer that rolls over to a new file every day, named `prefix.YYYY-MM-DD`.
pub fn rolling_daily(dir: impl AsRef<Path>, prefix: impl AsRef<Path>) -> IoWriter<RollingFileAppender> {
    IoWriter::new(rolling::daily(dir, prefix))
}

/// Compresses everything written into a single LZ4 frame.
///
/// The frame is finished when the writer is closed; data written after that
/// is rejected.
pub struct Lz4Writer<W: io::Write + Send> {
    encoder: Mutex<Option<FrameEncoder<W>>>,
}

impl<W: io::Write + Send> Lz4Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            encoder: Mutex::new(Some(FrameEncoder::new(inner))),
        }
    }

    /// Finishes the frame and hands back the underlying writer.
    pub fn finish(&self) -> io::Result<Option<W>> {
        match self.encoder.lock().take() {
            Some(encoder) => encoder.finish().map(Some).map_err(io::Error::other),
            None => Ok(None),
        }
    }
}

impl Lz4Writer<File> {
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: io::Write + Send> Writer for Lz4Writer<W> {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match self.encoder.lock().as_mut() {
            Some(encoder) => io::Write::write(encoder, buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "lz4 frame already finished")),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self.encoder.lock().as_mut() {
            Some(encoder) => io::Write::flush(encoder),
            None => Ok(()),
        }
    }

    fn close(&self) -> io::Result<()> {
        self.finish().map(drop)
    }
}

/// In-memory sink. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    data: Arc<Mutex<Vec<u8>>>,
    writes: Arc<AtomicU64>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.to_string_lossy().lines().map(str::to_owned).collect()
    }

    /// Number of `write` calls received.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.data.lock().clear();
    }
}

impl Writer for MemoryWriter {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.data.lock().extend_from_slice(buf);
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(buf.len())
    }
}

/// Accepts and drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardWriter;

impl Writer for DiscardWriter {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

//! Byte source/sink adapters used by container engines.
//!
//! Engines own a fixed-size buffer and call [`InputAdapter::read`] /
//! [`OutputAdapter::write`] repeatedly to fill or drain it. Neither side ever
//! seeks.

use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, TryRecvError, bounded};
use tracing::{debug, trace};

use crate::error::Result;

/// Engine I/O buffer size used when the caller does not choose one.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// A forward-only byte source.
pub trait ByteSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Number of bytes readable without blocking, when the source can tell.
    /// `Some(0)` and `None` both mean the next read may block.
    fn available(&mut self) -> Option<usize> {
        None
    }
}

impl<T: AsRef<[u8]> + Send> ByteSource for Cursor<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn available(&mut self) -> Option<usize> {
        let len = self.get_ref().as_ref().len() as u64;
        Some(len.saturating_sub(self.position()) as usize)
    }
}

/// Adapts any [`Read`] implementation. Availability is unknown, so a read
/// returns as soon as the first chunk arrives.
pub struct ReaderSource<R>(pub R);

impl<R: Read + Send> ByteSource for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// Source fed by a background thread copying from a blocking reader into a
/// bounded chunk queue. The queue is the only point of synchronisation.
pub struct PumpedSource {
    chunks: Receiver<io::Result<Vec<u8>>>,
    current: Vec<u8>,
    offset: usize,
    pending_error: Option<io::Error>,
    finished: bool,
}

impl PumpedSource {
    pub fn spawn<R>(mut reader: R, chunk_size: usize, queue_depth: usize) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = bounded(queue_depth.max(1));
        let chunk_size = chunk_size.max(1);
        thread::Builder::new()
            .name("source-pump".into())
            .spawn(move || {
                loop {
                    let mut chunk = vec![0u8; chunk_size];
                    let message = match reader.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            chunk.truncate(n);
                            Ok(chunk)
                        }
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => Err(err),
                    };
                    let failed = message.is_err();
                    if tx.send(message).is_err() || failed {
                        break;
                    }
                }
                trace!("source pump finished");
            })?;
        Ok(Self {
            chunks: rx,
            current: Vec::new(),
            offset: 0,
            pending_error: None,
            finished: false,
        })
    }

    fn accept(&mut self, message: Option<io::Result<Vec<u8>>>) {
        match message {
            Some(Ok(chunk)) => {
                self.current = chunk;
                self.offset = 0;
            }
            Some(Err(err)) => self.pending_error = Some(err),
            None => self.finished = true,
        }
    }
}

impl ByteSource for PumpedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(err) = self.pending_error.take() {
                return Err(err);
            }
            if self.offset < self.current.len() {
                break;
            }
            if self.finished {
                return Ok(0);
            }
            let message = self.chunks.recv().ok();
            self.accept(message);
        }
        let n = buf.len().min(self.current.len() - self.offset);
        buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }

    fn available(&mut self) -> Option<usize> {
        if self.offset >= self.current.len() && !self.finished && self.pending_error.is_none() {
            match self.chunks.try_recv() {
                Ok(message) => self.accept(Some(message)),
                Err(TryRecvError::Disconnected) => self.accept(None),
                Err(TryRecvError::Empty) => {}
            }
        }
        if self.pending_error.is_some() {
            return Some(1);
        }
        Some(self.current.len() - self.offset)
    }
}

/// Outcome of a successful read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Data(usize),
    Eof,
}

/// Read side handed to a container engine.
pub struct InputAdapter {
    source: Box<dyn ByteSource>,
    bytes_read: u64,
}

impl InputAdapter {
    pub fn new(source: impl ByteSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            bytes_read: 0,
        }
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self::new(ReaderSource(reader))
    }

    /// Reads on a dedicated thread so source latency overlaps with decoding.
    pub fn threaded(reader: impl Read + Send + 'static, chunk_size: usize) -> Result<Self> {
        Ok(Self::new(PumpedSource::spawn(reader, chunk_size, 8)?))
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Fills `buf` with as many bytes as are readily available.
    ///
    /// Once at least one byte has been delivered the call returns instead of
    /// waiting on the source. Exhaustion is reported as [`ReadStatus::Eof`],
    /// source faults as `Err`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus> {
        let mut filled = 0;
        while filled < buf.len() {
            if filled > 0 && self.source.available().unwrap_or(0) == 0 {
                break;
            }
            match self.source.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(error = %err, "byte source failed");
                    return Err(err.into());
                }
            }
        }
        self.bytes_read += filled as u64;
        if filled == 0 && !buf.is_empty() {
            return Ok(ReadStatus::Eof);
        }
        Ok(ReadStatus::Data(filled))
    }
}

/// Write side handed to a container engine.
pub struct OutputAdapter {
    sink: Box<dyn Write + Send>,
    max_write: usize,
    bytes_written: u64,
}

impl OutputAdapter {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            max_write: DEFAULT_BUFFER_SIZE,
            bytes_written: 0,
        }
    }

    /// Caps the size of each individual sink write.
    pub fn with_max_write(mut self, max_write: usize) -> Self {
        self.max_write = max_write.max(1);
        self
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Drains all of `buf` into the sink before returning its length.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let end = buf.len().min(written + self.max_write);
            match self.sink.write(&buf[written..end]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "sink accepted no bytes",
                    )
                    .into());
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        self.bytes_written += written as u64;
        Ok(written)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }
}

/// In-memory sink whose clones share one buffer, so the bytes can be read
/// back after the adapter owning the sink is gone.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data
            .lock()
            .map(|data| data.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| io::Error::other("memory sink poisoned"))?;
        data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out its data in fixed slices and reports nothing available.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone"))
        }
    }

    #[derive(Clone, Default)]
    struct Dribble {
        data: Arc<Mutex<Vec<u8>>>,
        calls: Arc<Mutex<usize>>,
    }

    impl Write for Dribble {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.data.lock().unwrap().extend_from_slice(&buf[..n]);
            *self.calls.lock().unwrap() += 1;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn cursor_fills_whole_buffer_when_data_is_ready() {
        let mut adapter = InputAdapter::new(Cursor::new(vec![7u8; 100]));
        let mut buf = [0u8; 64];
        assert_eq!(adapter.read(&mut buf).unwrap(), ReadStatus::Data(64));
        assert_eq!(adapter.read(&mut buf).unwrap(), ReadStatus::Data(36));
        assert_eq!(adapter.read(&mut buf).unwrap(), ReadStatus::Eof);
        assert_eq!(adapter.bytes_read(), 100);
    }

    #[test]
    fn unknown_availability_returns_short_read() {
        let mut adapter = InputAdapter::from_reader(Trickle {
            data: (0..20).collect(),
            pos: 0,
            step: 5,
        });
        let mut buf = [0u8; 16];
        assert_eq!(adapter.read(&mut buf).unwrap(), ReadStatus::Data(5));
        assert_eq!(&buf[..5], &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn source_fault_is_an_error_not_eof() {
        let mut adapter = InputAdapter::from_reader(Broken);
        let err = adapter.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn write_loops_until_drained() {
        let sink = Dribble::default();
        let mut adapter = OutputAdapter::new(sink.clone()).with_max_write(4);
        assert_eq!(adapter.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap(), 10);
        assert_eq!(*sink.data.lock().unwrap(), (1..=10).collect::<Vec<u8>>());
        assert!(*sink.calls.lock().unwrap() >= 4);
        assert_eq!(adapter.bytes_written(), 10);
    }

    #[test]
    fn pumped_source_delivers_everything() {
        let data: Vec<u8> = (0..=255).cycle().take(10_000).collect();
        let mut adapter = InputAdapter::threaded(Cursor::new(data.clone()), 333).unwrap();
        let mut collected = Vec::new();
        let mut buf = [0u8; 1024];
        while let ReadStatus::Data(n) = adapter.read(&mut buf).unwrap() {
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, data);
    }
}

#![forbid(unsafe_code)]

//! Bounded byte pipe between a crypto worker and the chain thread.
//!
//! The writer cuts its input into chunks of at most `pipe_chunk_size` bytes
//! and queues them on a `crossbeam` bounded channel; the reader implements
//! `BufRead` over the received chunks. At most `pipe_capacity` chunks are
//! ever held by the pipe: the one the writer is filling, the queued ones
//! and the one the reader is working on.

use std::io::{self, BufRead, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use stromsborg_chain::CancellationToken;
use stromsborg_core::{Error, SecurityProperties};

/// How often a blocked pipe end re-checks cancellation and its deadline.
pub(crate) const POLL: Duration = Duration::from_millis(50);

/// Byte accounting shared by both pipe ends.
#[derive(Debug, Default)]
pub struct PipeStats {
    sent: AtomicU64,
    received: AtomicU64,
    held: AtomicUsize,
    high_water: AtomicUsize,
    chunks: AtomicU64,
}

impl PipeStats {
    /// Largest number of bytes the pipe ever held at once. This covers the
    /// writer's partial chunk, the queue and the chunk the reader has not
    /// finished yet.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Bytes that went through the pipe.
    pub fn transferred(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::SeqCst)
    }

    /// Bytes currently held by the pipe.
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    fn record_accepted(&self, len: usize) {
        let held = self.held.fetch_add(len, Ordering::SeqCst) + len;
        self.high_water.fetch_max(held, Ordering::SeqCst);
    }

    fn record_released(&self, len: usize) {
        if len > 0 {
            self.held.fetch_sub(len, Ordering::SeqCst);
        }
    }

    fn record_sent(&self, len: usize) {
        self.sent.fetch_add(len as u64, Ordering::SeqCst);
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }

    fn record_received(&self, len: usize) {
        self.received.fetch_add(len as u64, Ordering::SeqCst);
    }
}

/// First error raised by a worker, re-raised on the consumer side.
#[derive(Debug, Clone, Default)]
pub struct FaultSlot(Arc<Mutex<Option<Error>>>);

impl FaultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `err` unless a fault is already recorded.
    pub fn set(&self, err: Error) {
        let mut slot = self.0.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            tracing::debug!(error = %err, "worker fault recorded");
            *slot = Some(err);
        }
    }

    pub fn take(&self) -> Option<Error> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }
}

/// Deadline-aware blocking shared by pipe ends and the encryption
/// multiplexer.
#[derive(Debug, Clone)]
pub(crate) struct Waiter {
    cancellation: CancellationToken,
    timeout: Option<Duration>,
}

impl Waiter {
    pub(crate) fn new(cancellation: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancellation,
            timeout,
        }
    }

    /// Fails once cancelled or once `started` is older than the timeout.
    pub(crate) fn check(&self, started: Instant, what: &str) -> Result<(), Error> {
        self.cancellation.check()?;
        match self.timeout {
            Some(limit) if started.elapsed() >= limit => Err(Error::InternalFailure(format!(
                "{what} stalled for more than {} ms",
                limit.as_millis()
            ))),
            _ => Ok(()),
        }
    }
}

/// Create a pipe sized by `properties`.
pub fn pipe(
    properties: &SecurityProperties,
    cancellation: CancellationToken,
    fault: FaultSlot,
) -> (PipeWriter, PipeReader) {
    // One chunk sits in the writer and one in the reader. With a capacity
    // of two the channel is a rendezvous.
    let (tx, rx) = bounded(properties.pipe_capacity.saturating_sub(2));
    let stats = Arc::new(PipeStats::default());
    let completed = Arc::new(AtomicBool::new(false));
    let waiter = Waiter::new(cancellation, properties.pipe_timeout());
    let chunk_size = properties.pipe_chunk_size.max(1);
    (
        PipeWriter {
            tx: Some(tx),
            pending: Vec::with_capacity(chunk_size),
            chunk_size,
            stats: Arc::clone(&stats),
            completed: Arc::clone(&completed),
            waiter: waiter.clone(),
        },
        PipeReader {
            rx,
            current: Vec::new(),
            pos: 0,
            stats,
            completed,
            fault,
            waiter,
            eof: false,
        },
    )
}

/// Producer end. Dropping it without [`PipeWriter::finish`] makes the
/// reader fail instead of seeing a clean end of stream.
pub struct PipeWriter {
    tx: Option<Sender<Vec<u8>>>,
    pending: Vec<u8>,
    chunk_size: usize,
    stats: Arc<PipeStats>,
    completed: Arc<AtomicBool>,
    waiter: Waiter,
}

impl PipeWriter {
    pub fn stats(&self) -> Arc<PipeStats> {
        Arc::clone(&self.stats)
    }

    /// Flush and close; the reader will see end of stream.
    pub fn finish(mut self) -> io::Result<()> {
        self.send_pending()?;
        self.completed.store(true, Ordering::SeqCst);
        self.tx = None;
        Ok(())
    }

    fn send_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.pending, Vec::with_capacity(self.chunk_size));
        self.send(chunk)
    }

    fn send(&self, chunk: Vec<u8>) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe already closed"))?;
        let len = chunk.len();
        let started = Instant::now();
        let mut chunk = chunk;
        loop {
            self.waiter
                .check(started, "pipe consumer")
                .map_err(Error::into_io)?;
            match tx.send_timeout(chunk, POLL) {
                Ok(()) => {
                    self.stats.record_sent(len);
                    return Ok(());
                }
                Err(SendTimeoutError::Timeout(back)) => chunk = back,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "pipe reader went away",
                    ));
                }
            }
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.pending.len();
        let take = room.min(buf.len());
        self.pending.extend_from_slice(&buf[..take]);
        self.stats.record_accepted(take);
        if self.pending.len() == self.chunk_size {
            self.send_pending()?;
        }
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_pending()
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.stats.record_released(self.pending.len());
    }
}

/// Consumer end.
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
    stats: Arc<PipeStats>,
    completed: Arc<AtomicBool>,
    fault: FaultSlot,
    waiter: Waiter,
    eof: bool,
}

impl PipeReader {
    pub fn stats(&self) -> Arc<PipeStats> {
        Arc::clone(&self.stats)
    }

    fn next_chunk(&mut self) -> io::Result<bool> {
        self.release_current();
        let started = Instant::now();
        loop {
            self.waiter
                .check(started, "pipe producer")
                .map_err(Error::into_io)?;
            match self.rx.recv_timeout(POLL) {
                Ok(chunk) => {
                    self.stats.record_received(chunk.len());
                    self.current = chunk;
                    self.pos = 0;
                    return Ok(true);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if let Some(err) = self.fault.take() {
                        return Err(err.into_io());
                    }
                    if self.completed.load(Ordering::SeqCst) {
                        self.eof = true;
                        return Ok(false);
                    }
                    return Err(Error::InternalFailure(
                        "pipe producer stopped without finishing".into(),
                    )
                    .into_io());
                }
            }
        }
    }

    fn release_current(&mut self) {
        self.stats.record_released(self.current.len());
        self.current = Vec::new();
        self.pos = 0;
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.release_current();
    }
}

impl BufRead for PipeReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.pos >= self.current.len() && !self.eof {
            if !self.next_chunk()? {
                break;
            }
        }
        if self.eof && self.pos >= self.current.len() {
            return Ok(&[]);
        }
        Ok(&self.current[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.current.len());
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn props(capacity: usize, chunk: usize) -> SecurityProperties {
        SecurityProperties {
            pipe_capacity: capacity,
            pipe_chunk_size: chunk,
            ..SecurityProperties::default()
        }
    }

    #[test]
    fn test_transfers_everything_within_bound() {
        let props = props(3, 16);
        let (mut writer, mut reader) = pipe(&props, CancellationToken::new(), FaultSlot::new());
        let stats = writer.stats();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = data.clone();
        let producer = thread::spawn(move || {
            writer.write_all(&data).unwrap();
            writer.finish().unwrap();
        });
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        producer.join().unwrap();
        assert_eq!(out, expected);
        assert_eq!(stats.transferred(), 10_000);
        assert!(stats.high_water() <= props.pipe_bound());
        assert!(stats.high_water() > 0);
    }

    #[test]
    fn test_high_water_counts_reader_and_writer_chunks() {
        let props = props(2, 16);
        let (mut writer, mut reader) = pipe(&props, CancellationToken::new(), FaultSlot::new());
        let stats = writer.stats();
        let producer = thread::spawn(move || {
            writer.write_all(&[1u8; 40]).unwrap();
            writer.finish().unwrap();
        });
        // Hold the first chunk while the writer blocks on a full second one.
        let mut first = [0u8; 1];
        reader.read_exact(&mut first).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.held() < 32 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(stats.held(), 32);
        assert_eq!(stats.high_water(), props.pipe_bound());

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        producer.join().unwrap();
        assert_eq!(rest.len(), 39);
        assert_eq!(stats.held(), 0);
        assert_eq!(stats.high_water(), 32);
    }

    #[test]
    fn test_fault_is_reraised() {
        let fault = FaultSlot::new();
        let (writer, mut reader) = pipe(&props(2, 16), CancellationToken::new(), fault.clone());
        fault.set(Error::Crypto("bad padding".into()));
        drop(writer);
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(matches!(Error::from_io(err), Error::Crypto(_)));
    }

    #[test]
    fn test_unfinished_writer_is_an_error() {
        let (writer, mut reader) = pipe(&props(2, 16), CancellationToken::new(), FaultSlot::new());
        drop(writer);
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(matches!(Error::from_io(err), Error::InternalFailure(_)));
    }

    #[test]
    fn test_stalled_consumer_times_out() {
        let props = SecurityProperties {
            pipe_timeout_ms: Some(100),
            ..props(2, 16)
        };
        let (mut writer, _reader) = pipe(&props, CancellationToken::new(), FaultSlot::new());
        let err = writer.write_all(&[0u8; 64]).unwrap_err();
        assert!(matches!(Error::from_io(err), Error::InternalFailure(_)));
    }

    #[test]
    fn test_cancellation_unblocks_reader() {
        let cancel = CancellationToken::new();
        let (_writer, mut reader) = pipe(&props(2, 16), cancel.clone(), FaultSlot::new());
        cancel.cancel();
        let err = reader.read(&mut [0u8; 4]).unwrap_err();
        assert!(matches!(Error::from_io(err), Error::Cancelled));
    }
}

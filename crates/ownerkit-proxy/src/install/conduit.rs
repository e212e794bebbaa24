//! Byte conduits between a package source and a session writer
//!
//! [`stream_through`] moves bytes from a producer on the calling thread to a
//! consumer on a worker thread (the remote side of a descriptor), applying a
//! bounded wait wherever the producer could otherwise block forever.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};

use ownerkit_core::{ProxyError, Result};

const CHANNEL_DEPTH: usize = 4;
const SEND_POLL: Duration = Duration::from_millis(2);

/// Copy `input` into `sink` in `chunk_bytes` pieces, then flush
pub fn copy_chunked<R, W>(input: &mut R, sink: &mut W, chunk_bytes: usize) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buffer = vec![0u8; chunk_bytes.max(1)];
    let mut total = 0u64;
    loop {
        let n = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink.write_all(&buffer[..n])?;
        total += n as u64;
    }
    sink.flush()?;
    Ok(total)
}

/// Read end of a conduit, handed to the consumer
pub struct ConduitReader {
    rx: Receiver<Vec<u8>>,
    current: Vec<u8>,
    offset: usize,
    timeout: Duration,
}

impl Read for ConduitReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.current.len() {
            match self.rx.recv_timeout(self.timeout) {
                Ok(chunk) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "conduit producer stalled",
                    ))
                }
            }
        }
        let n = buf.len().min(self.current.len() - self.offset);
        buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

enum SendOutcome {
    Sent,
    Closed,
    TimedOut,
}

fn send_bounded(tx: &SyncSender<Vec<u8>>, chunk: Vec<u8>, timeout: Duration) -> SendOutcome {
    let deadline = Instant::now() + timeout;
    let mut pending = chunk;
    loop {
        match tx.try_send(pending) {
            Ok(()) => return SendOutcome::Sent,
            Err(TrySendError::Disconnected(_)) => return SendOutcome::Closed,
            Err(TrySendError::Full(back)) => {
                if Instant::now() >= deadline {
                    return SendOutcome::TimedOut;
                }
                pending = back;
                thread::sleep(SEND_POLL);
            }
        }
    }
}

/// Stream `input` to `consumer` through a conduit
///
/// The consumer runs on a worker thread and must read its [`ConduitReader`]
/// to the end. Returns the number of bytes produced once the consumer has
/// finished. Fails with [`ProxyError::StreamTimeout`] if the consumer stops
/// draining, or does not finish, within `timeout`.
pub fn stream_through<R, F>(
    input: &mut R,
    chunk_bytes: usize,
    timeout: Duration,
    consumer: F,
) -> Result<u64>
where
    R: Read + ?Sized,
    F: FnOnce(ConduitReader) -> Result<()> + Send + 'static,
{
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(CHANNEL_DEPTH);
    let (done_tx, done_rx) = mpsc::channel::<Result<()>>();
    let reader = ConduitReader {
        rx,
        current: Vec::new(),
        offset: 0,
        timeout,
    };

    thread::Builder::new()
        .name("ownerkit-conduit".to_string())
        .spawn(move || {
            let _ = done_tx.send(consumer(reader));
        })
        .map_err(|e| ProxyError::internal(format!("failed to start conduit worker: {e}")))?;

    let mut buffer = vec![0u8; chunk_bytes.max(1)];
    let mut total = 0u64;
    let mut consumer_gone = false;
    loop {
        let n = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                drop(tx);
                let _ = done_rx.recv_timeout(timeout);
                return Err(e.into());
            }
        };
        match send_bounded(&tx, buffer[..n].to_vec(), timeout) {
            SendOutcome::Sent => total += n as u64,
            SendOutcome::Closed => {
                consumer_gone = true;
                break;
            }
            SendOutcome::TimedOut => return Err(ProxyError::StreamTimeout { timeout_ms }),
        }
    }
    drop(tx);

    match done_rx.recv_timeout(timeout) {
        Ok(Ok(())) if consumer_gone => Err(ProxyError::io(
            "consumer finished before the end of input",
        )),
        Ok(Ok(())) => Ok(total),
        Ok(Err(err)) => Err(err),
        Err(RecvTimeoutError::Timeout) => Err(ProxyError::StreamTimeout { timeout_ms }),
        Err(RecvTimeoutError::Disconnected) => {
            Err(ProxyError::internal("conduit worker exited without a result"))
        }
    }
}

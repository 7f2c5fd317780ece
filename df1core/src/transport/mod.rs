//! Byte-pipe transports. Each transport owns a worker thread that drains a
//! bounded send queue and forwards received chunks to the engine over an
//! inbound event channel; the engine never touches the I/O handle.

pub mod serial;
pub mod tcp;

use crate::support::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use std::time::Duration;

/// Bound on queued outbound frames; overflow surfaces to the caller.
pub const SEND_QUEUE_SIZE: usize = 100;
/// Receive-readiness poll interval for the worker loop.
pub const RECEIVE_POLL: Duration = Duration::from_millis(20);
/// How long `connect` waits for the worker to come up.
pub const WORKER_START_TIMEOUT: Duration = Duration::from_secs(1);
/// Pause between failed connection attempts.
pub const CONNECT_RETRY_PAUSE: Duration = Duration::from_secs(1);
/// Read chunk size for inbound data.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Events flowing from the transport worker to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A chunk of received bytes.
    Bytes(Vec<u8>),
    /// The peer closed the connection; the worker will try to reconnect.
    Disconnected,
    /// The comm-clear drain after (re)connect has finished.
    CommCleared,
}

/// Uniform byte-pipe contract shared by the TCP and serial transports.
pub trait Transport {
    /// Starts the worker and blocks until the first connection attempt
    /// resolves. On failure the worker keeps retrying in the background.
    fn connect(&mut self) -> Result<()>;

    /// Stops and joins the worker. Idempotent.
    fn close(&mut self);

    fn is_connected(&self) -> bool;

    /// True while the worker is draining stale bytes after a (re)connect;
    /// the engine must not emit commands during this phase.
    fn is_clearing_comm(&self) -> bool;

    /// True while outbound frames are still queued.
    fn is_pending_command(&self) -> bool;

    /// Queues a frame for transmission.
    fn send_bytes(&self, bytes: Vec<u8>) -> Result<()>;

    /// Discards queued outbound frames.
    fn clear_buffer(&self);

    /// The inbound event channel. The receiver side may be cloned and
    /// outlives reconnects.
    fn inbound(&self) -> &Receiver<Inbound>;
}

/// Pushes onto a bounded send queue, mapping a full queue to the overflow
/// error.
#[inline]
pub(crate) fn push_bounded(queue: &Sender<Vec<u8>>, bytes: Vec<u8>) -> Result<()> {
    queue.try_send(bytes).map_err(|_| Error::SendQueueOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_push_bounded_overflow() {
        let (tx, rx) = bounded(2);

        push_bounded(&tx, vec![1]).unwrap();
        push_bounded(&tx, vec![2]).unwrap();
        assert_eq!(push_bounded(&tx, vec![3]), Err(Error::SendQueueOverflow));

        rx.recv().unwrap();
        push_bounded(&tx, vec![3]).unwrap();
    }
}

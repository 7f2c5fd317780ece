use std::io;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Terminal failures surfaced to callers. Link-level trouble (NAK, bad CRC,
/// lost bytes) is handled by the retransmission machinery and never appears
/// here.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// The transmitter exhausted its retry budget without a matching reply.
    SendReceive,
    /// The bounded send queue is full.
    SendQueueOverflow,
    /// The receive accumulator exceeded its capacity.
    BufferOverflow,
    /// An address field or file type outside the supported range.
    NotImplemented(&'static str),
    /// Reply data length inconsistent with the declared file type.
    Arithmetic(&'static str),
    /// The transport worker failed to start in time.
    Thread,
    /// The transport is not connected.
    NotConnected,
    Io(io::ErrorKind),
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        Error::Io(io_error.kind())
    }
}

impl From<serialport::Error> for Error {
    #[inline]
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::Io(kind) => Error::Io(kind),
            _ => Error::NotConnected,
        }
    }
}


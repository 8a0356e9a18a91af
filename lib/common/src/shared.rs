use std::io;

pub type RastaResult<T> = Result<T, RastaError>;

/// Return codes surfaced by the protocol stack. Fatal kinds indicate a broken
/// core invariant or misuse of the API and are routed through the platform
/// adapter's fatal error trap before they propagate; recoverable kinds are
/// part of the normal control flow.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RastaError {
    NotInitialized,
    AlreadyInitialized,
    InvalidParameter,
    InvalidConfiguration,
    InvalidSequenceNumber,
    InvalidMessageCrc,
    InvalidBufferSize,
    SendBufferFull,
    ReceiveBufferFull,
    NoMessageToSend,
    NoMessageReceived,
    DeferQueueEmpty,
    InternalError,
}

impl RastaError {
    /// True for kinds that must reach the fatal error trap.
    #[inline]
    pub fn is_fatal(self) -> bool {
        match self {
            RastaError::InvalidConfiguration
            | RastaError::InvalidMessageCrc
            | RastaError::NoMessageToSend
            | RastaError::NoMessageReceived => false,
            _ => true,
        }
    }
}

impl From<io::Error> for RastaError {
    // Codec writes go into pre-validated fixed buffers, so an io error from
    // a cursor can only mean the bounds bookkeeping is broken.
    #[inline]
    fn from(_: io::Error) -> Self {
        RastaError::InternalError
    }
}

pub trait ErrorUtils {
    fn has_failed_fatally(&self) -> bool;
}

impl<T> ErrorUtils for RastaResult<T> {
    fn has_failed_fatally(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(err) => err.is_fatal(),
        }
    }
}

/// Augmented `io::Write` that is aware of the amount of remaining free capacity
/// in the destination.
pub trait SizedWrite: io::Write {
    /// Remaining free capacity in the destination.
    fn free_capacity(&self) -> usize;
}

/// Augmented `io::Read` that is aware of the amount of remaining data in the
/// source.
pub trait SizedRead: io::Read {
    /// Remaining data in the source.
    fn remaining_data(&self) -> usize;
}

impl SizedWrite for io::Cursor<&mut [u8]> {
    #[inline]
    fn free_capacity(&self) -> usize {
        self.get_ref().len() - self.position() as usize
    }
}

impl SizedRead for io::Cursor<&[u8]> {
    #[inline]
    fn remaining_data(&self) -> usize {
        self.get_ref().len() - self.position() as usize
    }
}

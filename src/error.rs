use std::fmt;
use std::io;

/// Error produced by a send/receive request.
///
/// Most variants simply wrap the `errno` the underlying syscall failed with.
/// [`SrrError::BufferTooSmall`] is synthetic: it has no corresponding errno
/// and is only ever produced by the UDP truncation-peek path (§4.2).
#[derive(Debug)]
pub enum SrrError {
    /// The syscall failed; carries the raw OS error.
    Io(io::Error),
    /// A queued UDP datagram is larger than the caller's remaining buffer
    /// capacity. The datagram was peeked, not consumed.
    BufferTooSmall,
}

impl SrrError {
    /// `0` on success is represented by `Ok(())` elsewhere; this returns the
    /// numeric code a C caller of this crate's original would have seen in
    /// `network_result_t.err`, with `BUFFER_TOO_SMALL` as the reserved
    /// negative sentinel from §4.2/§7.
    pub fn raw_code(&self) -> i32 {
        match self {
            SrrError::Io(e) => e.raw_os_error().unwrap_or(-1),
            SrrError::BufferTooSmall => -1,
        }
    }

    pub fn is_would_block(&self) -> bool {
        matches!(self, SrrError::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}

impl fmt::Display for SrrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SrrError::Io(e) => write!(f, "{e}"),
            SrrError::BufferTooSmall => write!(f, "incoming datagram larger than buffer"),
        }
    }
}

impl std::error::Error for SrrError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SrrError::Io(e) => Some(e),
            SrrError::BufferTooSmall => None,
        }
    }
}

impl From<io::Error> for SrrError {
    fn from(e: io::Error) -> Self {
        SrrError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, SrrError>;

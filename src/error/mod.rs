use std::error::Error;
use std::fmt;
use std::io;

pub type TransportResult<T> = Result<T, TransportError>;

const ERR_MSG_WOULD_BLOCK: &str = "operation would block, retry later";
const ERR_MSG_DISCONNECTED: &str = "peer endpoint is gone";

/// Failures reported by a transport socket or by the bridge around it.
///
/// `WouldBlock` is the expected backpressure signal of non-blocking I/O and
/// is never surfaced through the error event; everything else is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Non-blocking operation cannot proceed right now. Not a failure.
    WouldBlock,
    /// The peer endpoint has been dropped or the socket was closed.
    Disconnected,
    /// The transport reported an OS-level error code.
    Os(i32),
    /// The transport does not provide this lifecycle operation.
    Unsupported(&'static str),
    /// Creating a socket or adapter failed; nothing was constructed.
    Exhausted(&'static str),
    /// Transport failure carrying only a description.
    Other(String),
}

impl TransportError {
    /// True for the retry-later condition that drives write-interest arming.
    #[inline(always)]
    pub fn is_would_block(&self) -> bool {
        matches!(self, TransportError::WouldBlock)
    }

    /// OS error code, when one is attached.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            TransportError::Os(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::WouldBlock => write!(f, "{ERR_MSG_WOULD_BLOCK}"),
            TransportError::Disconnected => write!(f, "{ERR_MSG_DISCONNECTED}"),
            TransportError::Os(code) => {
                write!(f, "{}", io::Error::from_raw_os_error(*code))
            }
            TransportError::Unsupported(op) => write!(f, "operation not supported: {op}"),
            TransportError::Exhausted(what) => write!(f, "failed to allocate {what}"),
            TransportError::Other(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => TransportError::WouldBlock,
            _ => match err.raw_os_error() {
                Some(code) => TransportError::Os(code),
                None => TransportError::Other(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPIPE: i32 = 32;

    #[test]
    fn would_block_is_classified_from_io() {
        let err: TransportError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(err.is_would_block());
    }

    #[test]
    fn os_code_survives_conversion() {
        let err: TransportError = io::Error::from_raw_os_error(EPIPE).into();
        assert_eq!(err.os_code(), Some(EPIPE));
        assert!(!err.is_would_block());
    }
}

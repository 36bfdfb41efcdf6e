use bytes::Bytes;
use std::fmt;

/// Opaque message buffer moved through the bridge.
///
/// The payload is reference counted, so handing a message to a subscriber
/// or cloning it into a transport queue never copies the bytes. `more`
/// marks a part of a multipart message that has further parts behind it.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
    more: bool,
}

impl Message {
    /// Wrap an existing payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            more: false,
        }
    }

    /// Allocate a zero-filled message of the given size.
    pub fn with_size(size: usize) -> Self {
        Self::new(vec![0u8; size])
    }

    /// Mark this part as having more parts behind it.
    pub fn with_more(mut self, more: bool) -> Self {
        self.more = more;
        self
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Whether the part after this one belongs to the same logical message.
    #[inline(always)]
    pub fn more(&self) -> bool {
        self.more
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.payload.len())
            .field("more", &self.more)
            .finish()
    }
}

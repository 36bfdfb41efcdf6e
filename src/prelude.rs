pub use crate::bridge::{AdapterId, PollHook, SocketAdapter};
pub use crate::config::{BridgeConfig, DEFAULT_MAX_DRAIN_BATCH};
pub use crate::error::{TransportError, TransportResult};
pub use crate::event_loop::{EventLoop, FdHandler, LoopHandle, LoopLifecycle};
pub use crate::message::Message;
pub use crate::readiness::Readiness;
pub use crate::transport::{MemSocket, SocketKind, TransportSocket, DEFAULT_QUEUE_CAPACITY};
pub use crate::utils::LoggerConfig;

pub mod bridge;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod message;
pub mod readiness;
pub mod transport;
pub mod utils;

pub mod prelude;

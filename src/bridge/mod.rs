pub use adapter::*;
pub use hook::*;

mod adapter;
mod hook;

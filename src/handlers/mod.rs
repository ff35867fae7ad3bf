//! HTTP handlers: controller endpoints and the convention dispatcher.

pub mod dispatch;
pub mod endpoint;
pub use dispatch::*;
pub use endpoint::*;

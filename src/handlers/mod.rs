//! HTTP and event-stream request handlers.

pub mod extract;
pub mod http;
pub mod sessions;
pub mod stream;

pub use http::*;
pub use sessions::*;
pub use stream::*;

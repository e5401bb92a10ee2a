//! Data models for sessions, presence, and stream messages.

pub mod event;
pub mod presence;
pub mod session;

pub use event::*;
pub use presence::*;
pub use session::*;

//! Business logic: presence, session auto-creation, pause aggregation,
//! session lifecycle and status broadcasting.

pub mod broadcaster;
pub mod coordinator;
pub mod pause;
pub mod presence;
pub mod session;

pub use broadcaster::SessionBroadcaster;
pub use coordinator::{CoordinatorReport, SessionCoordinator};
pub use pause::PauseAggregator;
pub use presence::PresenceService;
pub use session::SessionService;

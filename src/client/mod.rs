//! Device-side session reconciliation.
//!
//! [`FocusTracker`] is the pure state machine; [`FocusClient`] wires it to a
//! [`SessionApi`] with timers. [`HttpSessionApi`] talks to this crate's server.

pub mod api;
pub mod controller;
pub mod debounce;
pub mod error;
pub mod sse;
pub mod tracker;

pub use api::{HttpSessionApi, SessionApi};
pub use controller::{ClientConfig, FocusClient};
pub use error::{ClientError, ClientResult};
pub use tracker::{
    FinalizeOutcome, FinalizeRequest, FinalizeTarget, FocusStatus, FocusTracker, Phase, Reconciled,
    TrackedSession,
};

//! testtaker-core — the client-side attempt engine.
//!
//! This crate holds everything needed to run one student's exam attempt
//! against an abstract backend: the data model, the answer cache and its
//! coalescing autosave, navigation rules, the countdown, the submission gate
//! and the [`controller::AttemptController`] that ties them together.

pub mod autosave;
pub mod cache;
pub mod controller;
pub mod error;
pub mod fixture;
pub mod gate;
pub mod mock;
pub mod model;
pub mod navigation;
pub mod observer;
pub mod timer;
pub mod traits;

pub use controller::{AttemptController, NavigationOutcome, SessionConfig, SessionSnapshot};
pub use error::{AttemptError, BackendError};
pub use gate::SubmitOutcome;
pub use model::NavTarget;

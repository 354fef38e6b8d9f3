//! Shared models and pure logic for the podkeeper daemon.

pub mod classify;
pub mod error;
pub mod model;
pub mod redact;
pub mod time;

pub use classify::*;
pub use error::*;
pub use model::*;
pub use redact::*;
pub use time::*;

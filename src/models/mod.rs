//! Shared record and payload types, grouped by area.

mod asset;
mod organization;
mod project;
mod repair;

pub use asset::*;
pub use organization::*;
pub use project::*;
pub use repair::*;

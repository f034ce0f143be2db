//! Data model of a check-in.
//!
//! # Core Concepts
//!
//! - [`CheckinDocument`]: everything gathered during one (or several undelivered)
//!   check-in cycles, keyed by module name. Persisted by
//!   [`ResultsStore`](crate::results::ResultsStore) and submitted as-is.
//! - [`ModuleSection`]: the sub-document one checkin module contributes.
//!   Conventional keys are typed (`facts`, `managed_items`, `update_history`,
//!   `messages`); anything else is kept as free-form JSON.
//! - [`ManagedItem`]: a trackable unit (package, profile, update) with a status
//!   and the time it was last seen.
//! - [`UpdateHistoryItem`]: an install, removal, error or pending event.

mod document;
mod history;
mod item;
mod section;

pub use document::*;
pub use history::*;
pub use item::*;
pub use section::*;

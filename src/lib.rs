//! Endpoint check-in client.
//!
//! Each checkin module inspects one subsystem of the machine and records a
//! named [`models::ModuleSection`] in the shared results file
//! ([`results::ResultsStore`]). The coordinator runs every module, submits
//! the accumulated [`models::CheckinDocument`] to the fleet server and only
//! removes the results file once the server accepted it.

pub mod client;
pub mod coordinator;
pub mod logging;
pub mod model_cache;
pub mod models;
pub mod modules;
pub mod prefs;
pub mod results;
pub mod submission;
pub mod value;

//! rolekeeper: time-limited Discord role assignments.
//!
//! Moderators grant roles for a number of days; a periodic sweep removes
//! them once they expire. Assignments live in SQLite and are mirrored to
//! Dropbox so the bot survives ephemeral hosting.

pub mod backup;
pub mod commands;
pub mod config;
pub mod error;
pub mod expiry;
pub mod ids;
pub mod interactions;
pub mod keylock;
pub mod platform;
#[cfg(unix)]
pub mod signal;
pub mod state;
pub mod store;
pub mod sweep;
pub mod web;

pub use error::{Error, Result};

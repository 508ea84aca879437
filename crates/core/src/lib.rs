//! Pure domain logic for the squadops batch workout engine.
//!
//! This crate carries no async runtime or store dependencies so it can be
//! used by the engine, an API layer, and CLI tooling alike:
//!
//! - [`types`] — batch data contracts and the per-item status machine.
//! - [`options`] — execution options with documented defaults.
//! - [`distribution`] — the bulk session distribution planner.
//! - [`conflict`] — conflict detection and bounded auto-resolution.
//! - [`schedule`] — recurrence patterns expanded into session dates.
//! - [`progress`] — the run state machine and live progress record.
//! - [`snapshot`] — snapshot/rollback value types and revert selection.
//! - [`requests`] — the typed request/response surface.

pub mod conflict;
pub mod distribution;
pub mod error;
pub mod options;
pub mod progress;
pub mod requests;
pub mod schedule;
pub mod snapshot;
pub mod types;

pub use error::CoreError;

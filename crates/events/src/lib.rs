//! Squadops batch event bus.
//!
//! Building blocks for streaming batch lifecycle updates to dashboards:
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`BatchEvent`] — the canonical batch event envelope.

pub mod bus;

pub use bus::{BatchEvent, EventBus};

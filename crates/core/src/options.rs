//! Batch execution options with documented defaults.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Chunk size used when `parallel` is set and the caller gives none.
pub const DEFAULT_CHUNK_SIZE: usize = 8;

/// Default timeout for a single collaborator call, in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Default delay between retry attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Upper bound on configurable retries, to keep runs terminating.
pub const MAX_RETRIES: u32 = 10;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Effect of one item's failure on the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorPolicy {
    /// Mark the item failed and proceed to the next. Default.
    Continue,
    /// Halt; undispatched items are reported as retryable "skipped" failures.
    Stop,
    /// Halt and revert every item already applied in this run.
    Rollback,
}

/// Bounded retry policy for item-level failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure. 0 disables retries.
    pub max_retries: u32,
    /// Delay between attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Error substrings that mark a failure retryable even when the
    /// collaborator did not flag it as such.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            retryable_errors: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Whether a failure with the given message/flag qualifies for a retry.
    pub fn is_retryable(&self, error: &str, flagged_retryable: bool) -> bool {
        flagged_retryable || self.retryable_errors.iter().any(|p| error.contains(p))
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Caller-supplied configuration for one batch run.
///
/// Field defaults: sequential execution, `Continue` on error, no retries,
/// non-atomic, real execution (not validate-only), no notifications,
/// conflicts advisory with auto-resolution on, no player overlap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOperationOptions {
    /// Fan items out into bounded parallel chunks instead of sequentially.
    pub parallel: bool,
    /// Chunk width for parallel execution.
    pub chunk_size: usize,
    pub on_error: OnErrorPolicy,
    pub retry: RetryPolicy,
    /// Partial application is defined as failure of the whole batch.
    /// Forces rollback-on-error semantics regardless of `on_error`.
    pub atomic: bool,
    /// Run validation and planning only; never touch a mutating surface.
    pub validate_only: bool,
    /// Send assignment notifications for created sessions.
    pub notify_players: bool,
    /// When false, any detected conflict blocks the affected session bucket.
    pub auto_resolve_conflicts: bool,
    /// Keep team-level grouping intact and allow a player to appear in more
    /// than one generated session.
    pub allow_player_overlap: bool,
    /// Timeout applied to each external collaborator call, in milliseconds.
    pub call_timeout_ms: u64,
}

impl Default for BatchOperationOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            on_error: OnErrorPolicy::Continue,
            retry: RetryPolicy::default(),
            atomic: false,
            validate_only: false,
            notify_players: false,
            auto_resolve_conflicts: true,
            allow_player_overlap: false,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl BatchOperationOptions {
    /// The on-error policy actually in force: `atomic` overrides the
    /// caller's explicit choice with `Rollback`.
    pub fn effective_on_error(&self) -> OnErrorPolicy {
        if self.atomic {
            OnErrorPolicy::Rollback
        } else {
            self.on_error
        }
    }

    /// Whether the executor must capture per-item snapshots before mutating.
    pub fn needs_snapshots(&self) -> bool {
        self.atomic || matches!(self.on_error, OnErrorPolicy::Rollback)
    }

    /// Structural validation of the options themselves.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.parallel && self.chunk_size == 0 {
            return Err(CoreError::Validation(
                "chunk_size must be at least 1 for parallel execution".to_string(),
            ));
        }
        if self.retry.max_retries > MAX_RETRIES {
            return Err(CoreError::Validation(format!(
                "max_retries {} exceeds the allowed maximum of {MAX_RETRIES}",
                self.retry.max_retries
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(CoreError::Validation(
                "call_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

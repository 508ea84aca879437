//! Scheduling conflict detection and bounded auto-resolution.
//!
//! Checks planned session buckets against existing commitments (sessions,
//! games, medical restrictions, facility/equipment/staff bookings) and
//! against each other. Conflicts are advisory unless auto-resolution is
//! disabled, in which case a conflicted bucket is blocked from execution.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::distribution::SessionDistributionSummary;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Forward shift applied per auto-resolution attempt, in minutes.
pub const RESOLVE_SHIFT_MINS: i64 = 15;

/// Maximum auto-resolution attempts before a conflict is reported unresolved.
pub const MAX_RESOLVE_ATTEMPTS: u32 = 4;

/// Session duration assumed when a bucket carries no estimate, in minutes.
pub const DEFAULT_SESSION_DURATION_MINS: i64 = 60;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// An existing time commitment for one player (session, game, or a medical
/// restriction window reported by the medical collaborator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerBooking {
    pub player_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Display reason, e.g. "existing session", "league game", "medical".
    pub reason: String,
}

/// An existing booking of a named facility or equipment item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceBooking {
    pub resource: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// An existing commitment for a coach or trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffBooking {
    pub staff_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Everything the schedule collaborator knows about the target window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExistingCommitments {
    pub player_bookings: Vec<PlayerBooking>,
    pub facility_bookings: Vec<ResourceBooking>,
    pub equipment_bookings: Vec<ResourceBooking>,
    pub staff_bookings: Vec<StaffBooking>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Conflict classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCategory {
    Equipment,
    Facilities,
    Scheduling,
    Players,
}

impl ConflictCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equipment => "equipment",
            Self::Facilities => "facilities",
            Self::Scheduling => "scheduling",
            Self::Players => "players",
        }
    }
}

/// One detected conflict on one session bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConflict {
    pub category: ConflictCategory,
    pub description: String,
}

impl SessionConflict {
    fn new(category: ConflictCategory, description: impl Into<String>) -> Self {
        Self {
            category,
            description: description.into(),
        }
    }

    /// Display form written into `SessionDistributionSummary.conflicts`.
    pub fn display(&self) -> String {
        format!("{}: {}", self.category.as_str(), self.description)
    }
}

/// Per-bucket conflict outcome.
#[derive(Debug, Clone, Serialize)]
pub struct SessionConflictReport {
    pub session_index: usize,
    /// Conflicts still standing after any auto-resolution.
    pub conflicts: Vec<SessionConflict>,
    /// Human-readable notes for conflicts resolved by shifting the start.
    pub resolved: Vec<String>,
    /// True when auto-resolution is off and the bucket must not execute.
    pub blocked: bool,
}

/// Conflict outcome for one planned batch.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub sessions: Vec<SessionConflictReport>,
}

impl ConflictReport {
    pub fn has_conflicts(&self) -> bool {
        self.sessions.iter().any(|s| !s.conflicts.is_empty())
    }

    pub fn blocked_indices(&self) -> Vec<usize> {
        self.sessions
            .iter()
            .filter(|s| s.blocked)
            .map(|s| s.session_index)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Detect conflicts for every planned bucket, auto-resolving player-window
/// clashes by shifting start times forward when `auto_resolve` is set.
///
/// Mutates `summaries`: resolved buckets get their shifted `start_time`, and
/// every remaining conflict is appended to the summary's `conflicts` list.
pub fn detect(
    summaries: &mut [SessionDistributionSummary],
    commitments: &ExistingCommitments,
    staff_ids: &[String],
    auto_resolve: bool,
) -> ConflictReport {
    // Windows of sibling buckets, for intra-batch double-booking checks.
    let sibling_windows: Vec<(usize, Option<(DateTime<Utc>, DateTime<Utc>)>, Option<String>, Vec<String>)> =
        summaries
            .iter()
            .map(|s| {
                (
                    s.session_index,
                    window_of(s),
                    s.facility.clone(),
                    s.equipment.clone().unwrap_or_default(),
                )
            })
            .collect();

    let mut sessions = Vec::with_capacity(summaries.len());
    for summary in summaries.iter_mut() {
        let mut resolved = Vec::new();
        let mut conflicts = Vec::new();

        // (a) players already booked in the same window, with bounded
        // auto-resolution by forward shifts.
        let player_conflicts = if auto_resolve {
            resolve_player_conflicts(summary, commitments, &mut resolved)
        } else {
            player_conflicts_at(summary, commitments, window_of(summary))
        };
        conflicts.extend(player_conflicts);

        if let Some((start, end)) = window_of(summary) {
            // (b) facility/equipment double-booking, existing and intra-batch.
            if let Some(facility) = &summary.facility {
                for booking in &commitments.facility_bookings {
                    if booking.resource == *facility && overlaps(start, end, booking.start, booking.end)
                    {
                        conflicts.push(SessionConflict::new(
                            ConflictCategory::Facilities,
                            format!("facility '{facility}' already booked at {}", booking.start),
                        ));
                    }
                }
                for (idx, win, fac, _) in &sibling_windows {
                    if *idx == summary.session_index {
                        continue;
                    }
                    if fac.as_deref() == Some(facility.as_str()) {
                        if let Some((s2, e2)) = win {
                            if overlaps(start, end, *s2, *e2) {
                                conflicts.push(SessionConflict::new(
                                    ConflictCategory::Facilities,
                                    format!("facility '{facility}' double-booked with session {idx}"),
                                ));
                            }
                        }
                    }
                }
            }

            for item in summary.equipment.clone().unwrap_or_default() {
                for booking in &commitments.equipment_bookings {
                    if booking.resource == item && overlaps(start, end, booking.start, booking.end) {
                        conflicts.push(SessionConflict::new(
                            ConflictCategory::Equipment,
                            format!("equipment '{item}' already booked at {}", booking.start),
                        ));
                    }
                }
                for (idx, win, _, equipment) in &sibling_windows {
                    if *idx == summary.session_index || !equipment.contains(&item) {
                        continue;
                    }
                    if let Some((s2, e2)) = win {
                        if overlaps(start, end, *s2, *e2) {
                            conflicts.push(SessionConflict::new(
                                ConflictCategory::Equipment,
                                format!("equipment '{item}' double-booked with session {idx}"),
                            ));
                        }
                    }
                }
            }

            // (c) coach/trainer double-booking.
            for staff in staff_ids {
                for booking in &commitments.staff_bookings {
                    if booking.staff_id == *staff && overlaps(start, end, booking.start, booking.end)
                    {
                        conflicts.push(SessionConflict::new(
                            ConflictCategory::Scheduling,
                            format!("coach '{staff}' already committed at {}", booking.start),
                        ));
                    }
                }
            }
        }

        summary
            .conflicts
            .extend(conflicts.iter().map(SessionConflict::display));

        let blocked = !auto_resolve && !conflicts.is_empty();
        sessions.push(SessionConflictReport {
            session_index: summary.session_index,
            conflicts,
            resolved,
            blocked,
        });
    }

    ConflictReport { sessions }
}

/// Shift the bucket's start forward in [`RESOLVE_SHIFT_MINS`]-minute steps
/// until no player conflict remains, bounded by [`MAX_RESOLVE_ATTEMPTS`].
///
/// Exhausting the attempts leaves the original start in place and returns
/// the surviving conflicts rather than silently dropping them.
fn resolve_player_conflicts(
    summary: &mut SessionDistributionSummary,
    commitments: &ExistingCommitments,
    resolved: &mut Vec<String>,
) -> Vec<SessionConflict> {
    let initial = player_conflicts_at(summary, commitments, window_of(summary));
    if initial.is_empty() {
        return initial;
    }
    let Some((original_start, original_end)) = window_of(summary) else {
        return initial;
    };
    let duration = original_end - original_start;

    for attempt in 1..=MAX_RESOLVE_ATTEMPTS {
        let start = original_start + Duration::minutes(RESOLVE_SHIFT_MINS * i64::from(attempt));
        let remaining = player_conflicts_at(summary, commitments, Some((start, start + duration)));
        if remaining.is_empty() {
            summary.start_time = Some(start);
            resolved.push(format!(
                "shifted session {} start by {} minutes to clear {} player conflict(s)",
                summary.session_index,
                RESOLVE_SHIFT_MINS * i64::from(attempt),
                initial.len()
            ));
            return Vec::new();
        }
    }

    // Unresolved after the attempt budget; report the original clashes.
    initial
}

fn player_conflicts_at(
    summary: &SessionDistributionSummary,
    commitments: &ExistingCommitments,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Vec<SessionConflict> {
    let Some((start, end)) = window else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for booking in &commitments.player_bookings {
        if summary.player_ids.contains(&booking.player_id)
            && overlaps(start, end, booking.start, booking.end)
        {
            out.push(SessionConflict::new(
                ConflictCategory::Players,
                format!(
                    "player '{}' unavailable ({}) at {}",
                    booking.player_id, booking.reason, booking.start
                ),
            ));
        }
    }
    out
}

fn window_of(summary: &SessionDistributionSummary) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = summary.start_time?;
    let mins = summary
        .estimated_duration_mins
        .unwrap_or(DEFAULT_SESSION_DURATION_MINS);
    Some((start, start + Duration::minutes(mins)))
}

fn overlaps(s1: DateTime<Utc>, e1: DateTime<Utc>, s2: DateTime<Utc>, e2: DateTime<Utc>) -> bool {
    s1 < e2 && s2 < e1
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Bulk session distribution planner.
//!
//! Splits a resolved pool of players and teams into N session buckets
//! according to a distribution strategy. The planner is pure: target
//! resolution (team rosters, skill scores) happens upstream, against the
//! player directory collaborator, and the resolved pool is passed in.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::TargetKind;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A player entry in the resolved pool, with an optional readiness score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolPlayer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<f64>,
}

impl PoolPlayer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            skill: None,
        }
    }

    pub fn with_skill(id: impl Into<String>, skill: f64) -> Self {
        Self {
            id: id.into(),
            skill: Some(skill),
        }
    }
}

/// An assignment target resolved against the player directory: a single
/// player carries itself as its only member, a team or group carries its
/// roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub kind: TargetKind,
    pub id: String,
    pub players: Vec<PoolPlayer>,
}

impl ResolvedTarget {
    pub fn player(player: PoolPlayer) -> Self {
        Self {
            kind: TargetKind::Player,
            id: player.id.clone(),
            players: vec![player],
        }
    }

    pub fn team(id: impl Into<String>, roster: Vec<PoolPlayer>) -> Self {
        Self {
            kind: TargetKind::Team,
            id: id.into(),
            players: roster,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How the pool is split across session buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStrategy {
    Even,
    Manual,
    TeamBased,
    SkillBased,
}

/// Caller-supplied bucket layout for the `Manual` strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualSessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(default)]
    pub player_ids: Vec<String>,
    #[serde(default)]
    pub team_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment: Option<Vec<String>>,
}

/// Bulk distribution configuration for one assign/schedule batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkModeConfig {
    pub number_of_sessions: usize,
    pub strategy: DistributionStrategy,
    /// Keep team-level grouping intact; a player may then appear in more
    /// than one generated session through overlapping team membership.
    #[serde(default)]
    pub allow_player_overlap: bool,
    #[serde(default)]
    pub stagger_start_times: bool,
    /// Offset between consecutive bucket start times, in minutes.
    #[serde(default = "default_stagger_interval")]
    pub stagger_interval_mins: i64,
    /// Base start time for the first bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_start_time: Option<DateTime<Utc>>,
    #[serde(default = "default_session_prefix")]
    pub session_name_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_mins: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment: Option<Vec<String>>,
    /// Explicit bucket layout, required by the `Manual` strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_configurations: Option<Vec<ManualSessionConfig>>,
}

fn default_stagger_interval() -> i64 {
    30
}

fn default_session_prefix() -> String {
    "Session".to_string()
}

impl BulkModeConfig {
    /// A minimal config for the given session count and strategy.
    pub fn new(number_of_sessions: usize, strategy: DistributionStrategy) -> Self {
        Self {
            number_of_sessions,
            strategy,
            allow_player_overlap: false,
            stagger_start_times: false,
            stagger_interval_mins: default_stagger_interval(),
            base_start_time: None,
            session_name_prefix: default_session_prefix(),
            estimated_duration_mins: None,
            facility: None,
            equipment: None,
            session_configurations: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One generated session bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDistributionSummary {
    pub session_index: usize,
    pub session_id: String,
    pub session_name: String,
    /// Players assigned individually to this bucket.
    pub player_count: usize,
    pub team_count: usize,
    /// Individually-assigned players plus team roster expansion.
    pub total_players: usize,
    pub player_ids: Vec<String>,
    pub team_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_mins: Option<i64>,
    /// Conflict descriptions attached by the conflict detector.
    #[serde(default)]
    pub conflicts: Vec<String>,
}

/// Planner output: the buckets plus advisory warnings (unassigned targets
/// in manual mode, missing skill scores, and the like).
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    pub summaries: Vec<SessionDistributionSummary>,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Split `pool` into `config.number_of_sessions` buckets.
///
/// Returns a configuration error (never a silent empty success) when the
/// session count is zero or the pool is empty.
pub fn plan(pool: &[ResolvedTarget], config: &BulkModeConfig) -> Result<PlanOutcome, CoreError> {
    if config.number_of_sessions < 1 {
        return Err(CoreError::Validation(
            "number_of_sessions must be at least 1".to_string(),
        ));
    }
    if pool.is_empty() {
        return Err(CoreError::Validation(
            "Distribution pool must not be empty".to_string(),
        ));
    }

    let mut outcome = match config.strategy {
        DistributionStrategy::Even => plan_even(pool, config),
        DistributionStrategy::Manual => plan_manual(pool, config)?,
        DistributionStrategy::TeamBased => plan_team_based(pool, config),
        DistributionStrategy::SkillBased => plan_skill_based(pool, config),
    };

    apply_start_times(&mut outcome.summaries, config);
    Ok(outcome)
}

/// Round-robin players into evenly-sized buckets.
///
/// Teams are expanded to their member players unless `allow_player_overlap`
/// keeps team-level grouping intact.
fn plan_even(pool: &[ResolvedTarget], config: &BulkModeConfig) -> PlanOutcome {
    let n = config.number_of_sessions;
    let mut buckets = empty_buckets(n, config);

    if config.allow_player_overlap {
        // Teams stay whole; round-robin teams and loose players separately.
        let mut team_cursor = 0usize;
        let mut player_cursor = 0usize;
        for target in pool {
            match target.kind {
                TargetKind::Player => {
                    let b = &mut buckets[player_cursor % n];
                    b.player_ids.extend(target.players.iter().map(|p| p.id.clone()));
                    player_cursor += 1;
                }
                TargetKind::Team | TargetKind::Group => {
                    let b = &mut buckets[team_cursor % n];
                    b.team_ids.push(target.id.clone());
                    b.roster_expansion += target.players.len();
                    team_cursor += 1;
                }
            }
        }
    } else {
        let players = expanded_unique_players(pool);
        for (i, player) in players.into_iter().enumerate() {
            buckets[i % n].player_ids.push(player.id);
        }
    }

    PlanOutcome {
        summaries: finish_buckets(buckets),
        warnings: Vec::new(),
    }
}

/// Build buckets from the caller-supplied session configurations.
///
/// Completeness is validated: every pool target must land in at least one
/// session; unassigned targets are reported as warnings, not hard errors.
fn plan_manual(pool: &[ResolvedTarget], config: &BulkModeConfig) -> Result<PlanOutcome, CoreError> {
    let Some(configs) = &config.session_configurations else {
        return Err(CoreError::Validation(
            "Manual distribution requires session_configurations".to_string(),
        ));
    };
    if configs.is_empty() {
        return Err(CoreError::Validation(
            "Manual distribution requires at least one session configuration".to_string(),
        ));
    }

    let mut warnings = Vec::new();
    if configs.len() != config.number_of_sessions {
        warnings.push(format!(
            "session_configurations length {} does not match number_of_sessions {}",
            configs.len(),
            config.number_of_sessions
        ));
    }

    let mut summaries = Vec::with_capacity(configs.len());
    for (i, sc) in configs.iter().enumerate() {
        let mut bucket = Bucket::new(i, config);
        if let Some(name) = &sc.session_name {
            bucket.name = name.clone();
        }
        bucket.start_time = sc.start_time;
        if sc.facility.is_some() {
            bucket.facility = sc.facility.clone();
        }
        if sc.equipment.is_some() {
            bucket.equipment = sc.equipment.clone();
        }

        for pid in &sc.player_ids {
            if !pool_contains_player(pool, pid) {
                warnings.push(format!("Player '{pid}' in session {i} is not in the target pool"));
            }
            bucket.player_ids.push(pid.clone());
        }
        for tid in &sc.team_ids {
            match pool.iter().find(|t| t.kind != TargetKind::Player && t.id == *tid) {
                Some(team) => bucket.roster_expansion += team.players.len(),
                None => warnings.push(format!(
                    "Team '{tid}' in session {i} is not in the target pool"
                )),
            }
            bucket.team_ids.push(tid.clone());
        }
        summaries.push(bucket);
    }

    // Completeness check over the pool.
    for target in pool {
        let assigned = match target.kind {
            TargetKind::Player => summaries.iter().any(|b| b.player_ids.contains(&target.id)),
            TargetKind::Team | TargetKind::Group => {
                summaries.iter().any(|b| b.team_ids.contains(&target.id))
            }
        };
        if !assigned {
            warnings.push(format!(
                "Target '{}' is not assigned to any session",
                target.id
            ));
        }
    }

    Ok(PlanOutcome {
        summaries: finish_buckets(summaries),
        warnings,
    })
}

/// Map each team to exactly one bucket, size-balancing when teams outnumber
/// sessions. A team is never split across sessions; loose players fill the
/// smallest buckets afterwards.
fn plan_team_based(pool: &[ResolvedTarget], config: &BulkModeConfig) -> PlanOutcome {
    let n = config.number_of_sessions;
    let mut buckets = empty_buckets(n, config);

    let mut teams: Vec<&ResolvedTarget> = pool
        .iter()
        .filter(|t| t.kind != TargetKind::Player)
        .collect();
    // Largest first so the greedy fill balances; id tie-break keeps the
    // layout deterministic.
    teams.sort_by(|a, b| {
        b.players
            .len()
            .cmp(&a.players.len())
            .then_with(|| a.id.cmp(&b.id))
    });

    for team in teams {
        let idx = smallest_bucket(&buckets);
        buckets[idx].team_ids.push(team.id.clone());
        buckets[idx].roster_expansion += team.players.len();
    }

    let mut players: Vec<&ResolvedTarget> = pool
        .iter()
        .filter(|t| t.kind == TargetKind::Player)
        .collect();
    players.sort_by(|a, b| a.id.cmp(&b.id));
    for player in players {
        let idx = smallest_bucket(&buckets);
        buckets[idx].player_ids.push(player.id.clone());
    }

    PlanOutcome {
        summaries: finish_buckets(buckets),
        warnings: Vec::new(),
    }
}

/// Balance buckets so mean skill is equalized across sessions.
///
/// Greedy: players sorted by skill descending (stable id tie-break) are
/// placed into the bucket with the lowest skill sum; ties prefer fewer
/// players, then the lower bucket index.
fn plan_skill_based(pool: &[ResolvedTarget], config: &BulkModeConfig) -> PlanOutcome {
    let n = config.number_of_sessions;
    let mut buckets = empty_buckets(n, config);
    let mut warnings = Vec::new();

    let mut players = expanded_unique_players(pool);
    for p in &players {
        if p.skill.is_none() {
            warnings.push(format!(
                "Player '{}' has no skill score; scored as 0.0",
                p.id
            ));
        }
    }
    players.sort_by(|a, b| {
        let sa = a.skill.unwrap_or(0.0);
        let sb = b.skill.unwrap_or(0.0);
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut sums = vec![0.0f64; n];
    for player in players {
        let mut idx = 0usize;
        for i in 1..n {
            let better = sums[i] < sums[idx]
                || (sums[i] == sums[idx]
                    && buckets[i].player_ids.len() < buckets[idx].player_ids.len());
            if better {
                idx = i;
            }
        }
        sums[idx] += player.skill.unwrap_or(0.0);
        buckets[idx].player_ids.push(player.id);
    }

    PlanOutcome {
        summaries: finish_buckets(buckets),
        warnings,
    }
}

// ---------------------------------------------------------------------------
// Bucket helpers
// ---------------------------------------------------------------------------

/// Work-in-progress bucket; turned into a summary by `finish_buckets`.
struct Bucket {
    index: usize,
    name: String,
    player_ids: Vec<String>,
    team_ids: Vec<String>,
    roster_expansion: usize,
    start_time: Option<DateTime<Utc>>,
    facility: Option<String>,
    equipment: Option<Vec<String>>,
    estimated_duration_mins: Option<i64>,
}

impl Bucket {
    fn new(index: usize, config: &BulkModeConfig) -> Self {
        Self {
            index,
            name: format!("{} {}", config.session_name_prefix, index + 1),
            player_ids: Vec::new(),
            team_ids: Vec::new(),
            roster_expansion: 0,
            start_time: None,
            facility: config.facility.clone(),
            equipment: config.equipment.clone(),
            estimated_duration_mins: config.estimated_duration_mins,
        }
    }

    fn size(&self) -> usize {
        self.player_ids.len() + self.roster_expansion
    }
}

fn empty_buckets(n: usize, config: &BulkModeConfig) -> Vec<Bucket> {
    (0..n).map(|i| Bucket::new(i, config)).collect()
}

fn smallest_bucket(buckets: &[Bucket]) -> usize {
    let mut idx = 0usize;
    for i in 1..buckets.len() {
        if buckets[i].size() < buckets[idx].size() {
            idx = i;
        }
    }
    idx
}

fn finish_buckets(buckets: Vec<Bucket>) -> Vec<SessionDistributionSummary> {
    buckets
        .into_iter()
        .map(|b| SessionDistributionSummary {
            session_index: b.index,
            session_id: Uuid::now_v7().to_string(),
            session_name: b.name,
            player_count: b.player_ids.len(),
            team_count: b.team_ids.len(),
            total_players: b.player_ids.len() + b.roster_expansion,
            player_ids: b.player_ids,
            team_ids: b.team_ids,
            start_time: b.start_time,
            facility: b.facility,
            equipment: b.equipment,
            estimated_duration_mins: b.estimated_duration_mins,
            conflicts: Vec::new(),
        })
        .collect()
}

/// Expand every target to its member players, deduplicating by player id
/// while preserving first-seen order.
fn expanded_unique_players(pool: &[ResolvedTarget]) -> Vec<PoolPlayer> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for target in pool {
        for player in &target.players {
            if seen.insert(player.id.clone()) {
                out.push(player.clone());
            }
        }
    }
    out
}

fn pool_contains_player(pool: &[ResolvedTarget], player_id: &str) -> bool {
    pool.iter()
        .any(|t| t.players.iter().any(|p| p.id == player_id))
}

fn apply_start_times(summaries: &mut [SessionDistributionSummary], config: &BulkModeConfig) {
    let Some(base) = config.base_start_time else {
        return;
    };
    for summary in summaries.iter_mut() {
        if summary.start_time.is_some() {
            continue; // manual configs keep their explicit times
        }
        summary.start_time = Some(if config.stagger_start_times {
            base + Duration::minutes(config.stagger_interval_mins * summary.session_index as i64)
        } else {
            base
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

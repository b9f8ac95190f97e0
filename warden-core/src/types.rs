//! Shared data model for the proctoring engine.
//!
//! Everything here serializes with camelCase field names — the same shapes go
//! out on the wire to dashboard observers and into snapshots on disk.

use serde::{Deserialize, Serialize};

/// Round a score to three decimals, the precision every stored score carries.
pub fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Current wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ── Events ───────────────────────────────────────────────────────────────────

/// Telemetry event kinds emitted by the editor agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Paste,
    Typing,
    FileChange,
    FileOperation,
    WindowBlur,
    Clipboard,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paste => "paste",
            Self::Typing => "typing",
            Self::FileChange => "file_change",
            Self::FileOperation => "file_operation",
            Self::WindowBlur => "window_blur",
            Self::Clipboard => "clipboard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "paste" => Some(Self::Paste),
            "typing" => Some(Self::Typing),
            "file_change" => Some(Self::FileChange),
            "file_operation" => Some(Self::FileOperation),
            "window_blur" => Some(Self::WindowBlur),
            "clipboard" => Some(Self::Clipboard),
            _ => None,
        }
    }
}

/// A scored, immutable telemetry event belonging to one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub participant_id: String,
    pub kind: EventKind,
    /// Agent-assigned epoch milliseconds, monotone within a connection.
    pub timestamp: i64,
    /// Opaque kind-specific payload, bounded at ingest.
    pub data: serde_json::Value,
    pub suspicion_score: f64,
    /// `suspicion_score >= 0.5`, derived at scoring time.
    pub flagged: bool,
}

// ── Participants ─────────────────────────────────────────────────────────────

/// Aggregate behavioural counters. The participant suspicion score is a pure
/// function of this struct — nothing else feeds it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantStats {
    pub paste_count: u64,
    pub paste_chars_total: u64,
    pub typing_anomalies: u64,
    pub window_blur_count: u64,
    pub window_blur_total_ms: u64,
    pub clipboard_changes: u64,
    pub files_created: u64,
    pub files_deleted: u64,
}

/// One contestant sandbox, keyed by its opaque stable machine id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Opaque stable id reported by the agent; doubles as the document key.
    pub machine_id: String,
    pub external_account_name: Option<String>,
    pub session_id: String,
    pub workspace: Option<String>,
    pub started_at: i64,
    pub last_active: i64,
    pub total_events: u64,
    pub stats: ParticipantStats,
    pub suspicion_score: f64,
}

impl Participant {
    pub fn new(machine_id: &str, session_id: &str, workspace: Option<&str>, now: i64) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            external_account_name: None,
            session_id: session_id.to_string(),
            workspace: workspace.map(str::to_string),
            started_at: now,
            last_active: now,
            total_events: 0,
            stats: ParticipantStats::default(),
            suspicion_score: 0.0,
        }
    }

    pub fn display_name(&self) -> &str {
        self.external_account_name.as_deref().unwrap_or(&self.machine_id)
    }
}

// ── Typing patterns ──────────────────────────────────────────────────────────

/// Inter-keystroke interval history plus derived statistics.
///
/// The interval list is capped at [`TypingPattern::MAX_SAMPLES`]; overflowing
/// discards the oldest [`TypingPattern::OVERFLOW_DROP`] samples, preserving
/// the most recent 8,000.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypingPattern {
    pub intervals: Vec<f64>,
    pub mean_interval: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub sample_count: usize,
    pub words_per_minute: f64,
}

impl TypingPattern {
    pub const MAX_SAMPLES: usize = 10_000;
    pub const KEEP_ON_OVERFLOW: usize = 8_000;

    /// Append intervals, apply the overflow rule, recompute the statistics.
    pub fn append(&mut self, new_intervals: &[f64]) {
        self.intervals.extend_from_slice(new_intervals);
        if self.intervals.len() > Self::MAX_SAMPLES {
            let drop = self.intervals.len() - Self::KEEP_ON_OVERFLOW;
            self.intervals.drain(..drop);
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        self.sample_count = self.intervals.len();
        if self.intervals.is_empty() {
            self.mean_interval = 0.0;
            self.variance = 0.0;
            self.std_dev = 0.0;
            self.words_per_minute = 0.0;
            return;
        }
        let n = self.intervals.len() as f64;
        let mean = self.intervals.iter().sum::<f64>() / n;
        let variance = self.intervals.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        self.mean_interval = mean;
        self.variance = variance;
        self.std_dev = variance.sqrt();
        self.words_per_minute = if mean > 0.0 { 60_000.0 / mean / 5.0 } else { 0.0 };
    }
}

// ── Source analysis ──────────────────────────────────────────────────────────

/// One commit as fetched from the remote source API, normalized for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub id: String,
    pub message: String,
    /// Author timestamp, epoch milliseconds.
    pub timestamp: i64,
    pub additions: i64,
    pub deletions: i64,
    pub files_changed: i64,
}

/// A commit that tripped one or more structural suspicion rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousCommit {
    pub commit_id: String,
    pub message: String,
    pub timestamp: i64,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// A commit landed within five minutes of its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurstCommit {
    pub commit_id: String,
    pub timestamp: i64,
    pub interval_ms: i64,
}

/// A long idle gap followed by a run of rapid commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleBurst {
    pub gap_ms: i64,
    /// Timestamp of the commit that ended the idle period.
    pub burst_start: i64,
    /// Commits in the run, including the one that ended the idle period.
    pub burst_commit_count: usize,
}

/// Aggregate commit statistics for the analysed window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommitStats {
    pub total_commits: u64,
    pub total_additions: i64,
    pub total_deletions: i64,
    pub total_files_changed: i64,
    pub avg_additions: i64,
    pub avg_deletions: i64,
    pub avg_files_changed: i64,
    /// Mean of positive inter-commit intervals; `None` with fewer than two commits.
    pub avg_interval_ms: Option<i64>,
}

/// Hour-of-day histogram and total inter-commit gap time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingAnalysis {
    pub hour_histogram: [u64; 24],
    pub total_gap_ms: i64,
}

impl Default for TimingAnalysis {
    fn default() -> Self {
        Self { hour_histogram: [0; 24], total_gap_ms: 0 }
    }
}

/// A cross-repository similarity hit. The counterpart side is a weak
/// reference — it may have been deleted; resolvers tolerate the miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityMatch {
    pub other_participant_id: String,
    pub other_owner: String,
    pub other_repo: String,
    pub file: String,
    pub other_file: String,
    pub similarity: f64,
    pub identical_content: bool,
    pub detected_at: i64,
}

/// Per-repository analysis document: aggregate stats, timing, bounded
/// suspicious/burst/idle lists, similarity matches, and the derived score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAnalysisRecord {
    pub participant_id: String,
    pub owner: String,
    pub repo: String,
    pub default_branch: String,
    pub commit_stats: CommitStats,
    pub timing: TimingAnalysis,
    pub suspicious_commits: Vec<SuspiciousCommit>,
    pub burst_commits: Vec<BurstCommit>,
    pub idle_bursts: Vec<IdleBurst>,
    pub similarity_matches: Vec<SimilarityMatch>,
    pub highest_similarity: f64,
    pub avg_commit_suspicion_score: f64,
    pub source_suspicion_score: f64,
    pub last_processed_commit_id: Option<String>,
    pub last_sync_at: Option<i64>,
}

impl SourceAnalysisRecord {
    pub const MAX_SUSPICIOUS_COMMITS: usize = 200;
    pub const MAX_BURST_COMMITS: usize = 100;
    pub const MAX_IDLE_BURSTS: usize = 100;
    pub const MAX_SIMILARITY_MATCHES: usize = 100;

    pub fn new(participant_id: &str, owner: &str, repo: &str, default_branch: &str) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            default_branch: default_branch.to_string(),
            commit_stats: CommitStats::default(),
            timing: TimingAnalysis::default(),
            suspicious_commits: Vec::new(),
            burst_commits: Vec::new(),
            idle_bursts: Vec::new(),
            similarity_matches: Vec::new(),
            highest_similarity: 0.0,
            avg_commit_suspicion_score: 0.0,
            source_suspicion_score: 0.0,
            last_processed_commit_id: None,
            last_sync_at: None,
        }
    }

    /// Keep only the most recent entries of each bounded list.
    pub fn truncate_bounds(&mut self) {
        truncate_front(&mut self.suspicious_commits, Self::MAX_SUSPICIOUS_COMMITS);
        truncate_front(&mut self.burst_commits, Self::MAX_BURST_COMMITS);
        truncate_front(&mut self.idle_bursts, Self::MAX_IDLE_BURSTS);
        truncate_front(&mut self.similarity_matches, Self::MAX_SIMILARITY_MATCHES);
    }

    /// Raise `highest_similarity`; it never moves downward.
    pub fn raise_highest_similarity(&mut self, similarity: f64) {
        if similarity > self.highest_similarity {
            self.highest_similarity = similarity;
        }
    }
}

fn truncate_front<T>(list: &mut Vec<T>, bound: usize) {
    if list.len() > bound {
        let excess = list.len() - bound;
        list.drain(..excess);
    }
}

// ── Alerts ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    None,
    Warning,
    Critical,
}

/// Outcome of evaluating a participant's state against the alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvaluation {
    pub level: AlertLevel,
    pub reasons: Vec<String>,
    pub should_alert: bool,
}

/// An alert as broadcast to observers and handed to outbound channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub participant_id: String,
    pub display_name: String,
    pub level: AlertLevel,
    pub reasons: Vec<String>,
    pub score: f64,
    pub timestamp: i64,
}

// ── Dashboard read shapes ────────────────────────────────────────────────────

/// `(kind, flagged)` bucket of a participant's event timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspicionBucket {
    pub kind: EventKind,
    pub flagged: bool,
    pub count: u64,
    pub avg_score: f64,
    pub max_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousParticipant {
    #[serde(flatten)]
    pub participant: Participant,
    pub flagged_event_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverviewStats {
    pub total_participants: u64,
    pub active_participants: u64,
    pub total_events: u64,
    pub flagged_events: u64,
    pub avg_suspicion_score: f64,
}

/// Compact participant shape pushed to observers on every update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub machine_id: String,
    pub display_name: String,
    pub suspicion_score: f64,
    pub last_active: i64,
    pub total_events: u64,
    pub stats: ParticipantStats,
}

impl From<&Participant> for ParticipantSummary {
    fn from(p: &Participant) -> Self {
        Self {
            machine_id: p.machine_id.clone(),
            display_name: p.display_name().to_string(),
            suspicion_score: p.suspicion_score,
            last_active: p.last_active,
            total_events: p.total_events,
            stats: p.stats.clone(),
        }
    }
}

/// Compact source-analysis shape pushed to observers after each sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAnalysisSummary {
    pub participant_id: String,
    pub owner: String,
    pub repo: String,
    pub source_suspicion_score: f64,
    pub highest_similarity: f64,
    pub suspicious_commit_count: usize,
    pub burst_commit_count: usize,
    pub idle_burst_count: usize,
    pub last_sync_at: Option<i64>,
}

impl From<&SourceAnalysisRecord> for SourceAnalysisSummary {
    fn from(r: &SourceAnalysisRecord) -> Self {
        Self {
            participant_id: r.participant_id.clone(),
            owner: r.owner.clone(),
            repo: r.repo.clone(),
            source_suspicion_score: r.source_suspicion_score,
            highest_similarity: r.highest_similarity,
            suspicious_commit_count: r.suspicious_commits.len(),
            burst_commit_count: r.burst_commits.len(),
            idle_burst_count: r.idle_bursts.len(),
            last_sync_at: r.last_sync_at,
        }
    }
}

/// Entity counts reported by `/health`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreCounts {
    pub participants: u64,
    pub events: u64,
    pub source_analyses: u64,
}

/// Batch-local typing statistics computed by the ingest pipeline and handed
/// to the scorer alongside each event.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchTypingStats {
    pub avg_interval: f64,
    pub variance: f64,
}

impl BatchTypingStats {
    pub fn from_intervals(intervals: &[f64]) -> Self {
        if intervals.is_empty() {
            return Self::default();
        }
        let n = intervals.len() as f64;
        let mean = intervals.iter().sum::<f64>() / n;
        let variance = intervals.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Self { avg_interval: mean, variance }
    }
}

/// Per-participant derived state handed to the scorer: clipboard activity in
/// the last minute and whether any typing has ever been seen.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecentContext {
    pub clipboard_changes_60s: u64,
    pub had_typing_before: bool,
}

/// Helper for kind-specific access into opaque event payloads.
pub fn data_str<'a>(data: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(|v| v.as_str())
}

pub fn data_f64(data: &serde_json::Value, key: &str) -> Option<f64> {
    data.get(key).and_then(|v| v.as_f64())
}

pub fn data_u64(data: &serde_json::Value, key: &str) -> Option<u64> {
    data.get(key).and_then(|v| v.as_u64())
}

pub fn data_bool(data: &serde_json::Value, key: &str) -> Option<bool> {
    data.get(key).and_then(|v| v.as_bool())
}

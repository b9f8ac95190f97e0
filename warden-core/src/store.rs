//! # Store Gateway — Persistence contract and the in-memory store
//!
//! The engine is written against the narrow [`StoreGateway`] contract so it
//! stays testable against doubles. The shipped implementation is
//! [`MemoryStore`]: lock-guarded maps with the bounded-list rules applied on
//! write, snapshotting to disk via the persistence layer. Participant counter
//! updates run under the store's write lock, so concurrent batches for one
//! participant are serialised (single-writer on each document).

use crate::error::WardenResult;
use crate::persistence::Persistable;
use crate::types::*;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Events retained per participant before the oldest 10% are pruned.
const MAX_EVENTS_PER_PARTICIPANT: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }
}

/// Narrow persistence contract used by the ingest pipeline, the sync
/// scheduler, and the dashboard read surface.
pub trait StoreGateway: Send + Sync {
    /// Create-or-refresh a participant; sets `last_active` to now.
    fn upsert_participant(&self, machine_id: &str, session_id: &str, workspace: Option<&str>) -> Participant;

    fn get_participant(&self, machine_id: &str) -> Option<Participant>;

    /// Mutate one participant under the store's write lock and return the
    /// stored result. The closure is the single writer for that document.
    fn update_participant(
        &self,
        machine_id: &str,
        mutate: &mut dyn FnMut(&mut Participant),
    ) -> Option<Participant>;

    /// Append a scored batch. Idempotent per batch: callers never retry a
    /// partially applied batch. Returns the number of rows stored.
    fn append_events(&self, participant_id: &str, events: Vec<EventRecord>) -> usize;

    /// Append typing intervals, apply the 10,000/8,000 truncation rule,
    /// recompute the derived statistics.
    fn update_typing_pattern(&self, participant_id: &str, intervals: &[f64]) -> TypingPattern;

    fn typing_pattern(&self, participant_id: &str) -> Option<TypingPattern>;

    /// Clipboard events recorded for this participant since `since_ms`.
    fn recent_clipboard_count(&self, participant_id: &str, since_ms: i64) -> u64;

    /// Whether any typing or file-change event was ever recorded.
    fn has_any_typing_event(&self, participant_id: &str) -> bool;

    fn get_or_create_source_analysis(
        &self,
        participant_id: &str,
        owner: &str,
        repo: &str,
        default_branch: &str,
    ) -> SourceAnalysisRecord;

    fn get_source_analysis(&self, participant_id: &str) -> Option<SourceAnalysisRecord>;

    /// Write a record back; bounded lists are truncated on write. Returns
    /// the stored record.
    fn persist_source_analysis(&self, record: SourceAnalysisRecord) -> SourceAnalysisRecord;

    fn list_registered_source_analyses(&self) -> Vec<SourceAnalysisRecord>;

    // ── Dashboard reads ──────────────────────────────────────────────────

    fn list_participants(
        &self,
        sort: &str,
        order: SortOrder,
        limit: usize,
        offset: usize,
    ) -> (Vec<Participant>, usize);

    /// Timeline page for one participant, newest first, with the total row
    /// count for the applied filter.
    fn participant_events(
        &self,
        participant_id: &str,
        limit: usize,
        offset: usize,
        kind: Option<EventKind>,
        flagged_only: bool,
    ) -> (Vec<EventRecord>, usize);

    fn suspicion_breakdown(&self, participant_id: &str) -> Vec<SuspicionBucket>;

    fn suspicious_participants(&self, limit: usize) -> Vec<SuspiciousParticipant>;

    fn overview(&self) -> OverviewStats;

    fn source_overview(&self, limit: usize) -> Vec<SourceAnalysisRecord>;

    fn counts(&self) -> StoreCounts;
}

// ── In-memory store ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    participants: HashMap<String, Participant>,
    events: HashMap<String, Vec<EventRecord>>,
    typing: HashMap<String, TypingPattern>,
    source: HashMap<String, SourceAnalysisRecord>,
    /// Participants with at least one typing or file-change event.
    typed_participants: HashSet<String>,
}

pub struct MemoryStore {
    state: RwLock<StoreState>,
    total_events: AtomicU64,
    total_pruned: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            total_events: AtomicU64::new(0),
            total_pruned: AtomicU64::new(0),
        }
    }

    pub fn total_events_stored(&self) -> u64 {
        self.total_events.load(Ordering::Relaxed)
    }

    pub fn total_events_pruned(&self) -> u64 {
        self.total_pruned.load(Ordering::Relaxed)
    }
}

impl StoreGateway for MemoryStore {
    fn upsert_participant(&self, machine_id: &str, session_id: &str, workspace: Option<&str>) -> Participant {
        let now = now_ms();
        let mut state = self.state.write();
        let participant = state
            .participants
            .entry(machine_id.to_string())
            .and_modify(|p| {
                p.session_id = session_id.to_string();
                if workspace.is_some() {
                    p.workspace = workspace.map(str::to_string);
                }
                // Last-writer-wins, but never moves backwards.
                if now > p.last_active {
                    p.last_active = now;
                }
            })
            .or_insert_with(|| Participant::new(machine_id, session_id, workspace, now));
        participant.clone()
    }

    fn get_participant(&self, machine_id: &str) -> Option<Participant> {
        self.state.read().participants.get(machine_id).cloned()
    }

    fn update_participant(
        &self,
        machine_id: &str,
        mutate: &mut dyn FnMut(&mut Participant),
    ) -> Option<Participant> {
        let mut state = self.state.write();
        let participant = state.participants.get_mut(machine_id)?;
        mutate(participant);
        Some(participant.clone())
    }

    fn append_events(&self, participant_id: &str, events: Vec<EventRecord>) -> usize {
        if events.is_empty() {
            return 0;
        }
        let appended = events.len();
        let mut state = self.state.write();
        if events
            .iter()
            .any(|e| matches!(e.kind, EventKind::Typing | EventKind::FileChange))
        {
            state.typed_participants.insert(participant_id.to_string());
        }
        let timeline = state.events.entry(participant_id.to_string()).or_default();
        timeline.extend(events);
        if timeline.len() > MAX_EVENTS_PER_PARTICIPANT {
            let drain = MAX_EVENTS_PER_PARTICIPANT / 10;
            timeline.drain(..drain);
            self.total_pruned.fetch_add(drain as u64, Ordering::Relaxed);
        }
        self.total_events.fetch_add(appended as u64, Ordering::Relaxed);
        appended
    }

    fn update_typing_pattern(&self, participant_id: &str, intervals: &[f64]) -> TypingPattern {
        let mut state = self.state.write();
        let pattern = state.typing.entry(participant_id.to_string()).or_default();
        pattern.append(intervals);
        pattern.clone()
    }

    fn typing_pattern(&self, participant_id: &str) -> Option<TypingPattern> {
        self.state.read().typing.get(participant_id).cloned()
    }

    fn recent_clipboard_count(&self, participant_id: &str, since_ms: i64) -> u64 {
        let state = self.state.read();
        let Some(timeline) = state.events.get(participant_id) else {
            return 0;
        };
        // Timestamps are monotone within a timeline, so walk from the tail.
        timeline
            .iter()
            .rev()
            .take_while(|e| e.timestamp >= since_ms)
            .filter(|e| e.kind == EventKind::Clipboard)
            .count() as u64
    }

    fn has_any_typing_event(&self, participant_id: &str) -> bool {
        self.state.read().typed_participants.contains(participant_id)
    }

    fn get_or_create_source_analysis(
        &self,
        participant_id: &str,
        owner: &str,
        repo: &str,
        default_branch: &str,
    ) -> SourceAnalysisRecord {
        let mut state = self.state.write();
        state
            .source
            .entry(participant_id.to_string())
            .and_modify(|r| {
                if r.owner != owner || r.repo != repo {
                    // Repo re-registered: start a fresh analysis window.
                    *r = SourceAnalysisRecord::new(participant_id, owner, repo, default_branch);
                } else {
                    r.default_branch = default_branch.to_string();
                }
            })
            .or_insert_with(|| SourceAnalysisRecord::new(participant_id, owner, repo, default_branch))
            .clone()
    }

    fn get_source_analysis(&self, participant_id: &str) -> Option<SourceAnalysisRecord> {
        self.state.read().source.get(participant_id).cloned()
    }

    fn persist_source_analysis(&self, mut record: SourceAnalysisRecord) -> SourceAnalysisRecord {
        record.truncate_bounds();
        let mut state = self.state.write();
        state.source.insert(record.participant_id.clone(), record.clone());
        record
    }

    fn list_registered_source_analyses(&self) -> Vec<SourceAnalysisRecord> {
        let mut records: Vec<_> = self.state.read().source.values().cloned().collect();
        records.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        records
    }

    fn list_participants(
        &self,
        sort: &str,
        order: SortOrder,
        limit: usize,
        offset: usize,
    ) -> (Vec<Participant>, usize) {
        let state = self.state.read();
        let mut all: Vec<_> = state.participants.values().cloned().collect();
        let total = all.len();
        match sort {
            "lastActive" => all.sort_by_key(|p| p.last_active),
            "totalEvents" => all.sort_by_key(|p| p.total_events),
            "startedAt" => all.sort_by_key(|p| p.started_at),
            "machineId" => all.sort_by(|a, b| a.machine_id.cmp(&b.machine_id)),
            _ => all.sort_by(|a, b| {
                a.suspicion_score
                    .partial_cmp(&b.suspicion_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.machine_id.cmp(&b.machine_id))
            }),
        }
        if order == SortOrder::Desc {
            all.reverse();
        }
        let page = all.into_iter().skip(offset).take(limit).collect();
        (page, total)
    }

    fn participant_events(
        &self,
        participant_id: &str,
        limit: usize,
        offset: usize,
        kind: Option<EventKind>,
        flagged_only: bool,
    ) -> (Vec<EventRecord>, usize) {
        let state = self.state.read();
        let Some(timeline) = state.events.get(participant_id) else {
            return (Vec::new(), 0);
        };
        let matches = |e: &&EventRecord| {
            kind.map_or(true, |k| e.kind == k) && (!flagged_only || e.flagged)
        };
        let total = timeline.iter().filter(matches).count();
        let page = timeline
            .iter()
            .rev()
            .filter(matches)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }

    fn suspicion_breakdown(&self, participant_id: &str) -> Vec<SuspicionBucket> {
        let state = self.state.read();
        let Some(timeline) = state.events.get(participant_id) else {
            return Vec::new();
        };
        let mut buckets: HashMap<(EventKind, bool), (u64, f64, f64)> = HashMap::new();
        for event in timeline {
            let entry = buckets.entry((event.kind, event.flagged)).or_insert((0, 0.0, 0.0));
            entry.0 += 1;
            entry.1 += event.suspicion_score;
            entry.2 = entry.2.max(event.suspicion_score);
        }
        let mut result: Vec<_> = buckets
            .into_iter()
            .map(|((kind, flagged), (count, sum, max))| SuspicionBucket {
                kind,
                flagged,
                count,
                avg_score: round3(sum / count as f64),
                max_score: max,
            })
            .collect();
        result.sort_by(|a, b| {
            a.kind.as_str().cmp(b.kind.as_str()).then(a.flagged.cmp(&b.flagged))
        });
        result
    }

    fn suspicious_participants(&self, limit: usize) -> Vec<SuspiciousParticipant> {
        let state = self.state.read();
        let mut suspicious: Vec<_> = state
            .participants
            .values()
            .filter(|p| p.suspicion_score > 0.0)
            .cloned()
            .collect();
        suspicious.sort_by(|a, b| {
            b.suspicion_score
                .partial_cmp(&a.suspicion_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.machine_id.cmp(&b.machine_id))
        });
        suspicious
            .into_iter()
            .take(limit)
            .map(|p| {
                let flagged = state
                    .events
                    .get(&p.machine_id)
                    .map_or(0, |t| t.iter().filter(|e| e.flagged).count() as u64);
                SuspiciousParticipant { participant: p, flagged_event_count: flagged }
            })
            .collect()
    }

    fn overview(&self) -> OverviewStats {
        let state = self.state.read();
        let now = now_ms();
        let total_participants = state.participants.len() as u64;
        let active_participants = state
            .participants
            .values()
            .filter(|p| now - p.last_active <= 5 * 60 * 1000)
            .count() as u64;
        let mut total_events = 0u64;
        let mut flagged_events = 0u64;
        for timeline in state.events.values() {
            total_events += timeline.len() as u64;
            flagged_events += timeline.iter().filter(|e| e.flagged).count() as u64;
        }
        let avg_suspicion_score = if total_participants == 0 {
            0.0
        } else {
            round3(
                state.participants.values().map(|p| p.suspicion_score).sum::<f64>()
                    / total_participants as f64,
            )
        };
        OverviewStats {
            total_participants,
            active_participants,
            total_events,
            flagged_events,
            avg_suspicion_score,
        }
    }

    fn source_overview(&self, limit: usize) -> Vec<SourceAnalysisRecord> {
        let mut records: Vec<_> = self.state.read().source.values().cloned().collect();
        records.sort_by(|a, b| {
            b.source_suspicion_score
                .partial_cmp(&a.source_suspicion_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        records.truncate(limit);
        records
    }

    fn counts(&self) -> StoreCounts {
        let state = self.state.read();
        StoreCounts {
            participants: state.participants.len() as u64,
            events: state.events.values().map(|t| t.len() as u64).sum(),
            source_analyses: state.source.len() as u64,
        }
    }
}

impl Persistable for MemoryStore {
    fn persist_name(&self) -> &str {
        "warden-store"
    }

    fn snapshot(&self) -> WardenResult<Vec<u8>> {
        let state = self.state.read();
        Ok(serde_json::to_vec(&*state)?)
    }

    fn restore(&self, data: &[u8]) -> WardenResult<()> {
        let mut restored: StoreState = serde_json::from_slice(data)?;
        // Derived set, rebuilt rather than trusted from disk.
        restored.typed_participants = restored
            .events
            .iter()
            .filter(|(_, t)| {
                t.iter().any(|e| matches!(e.kind, EventKind::Typing | EventKind::FileChange))
            })
            .map(|(id, _)| id.clone())
            .collect();
        let event_count: u64 = restored.events.values().map(|t| t.len() as u64).sum();
        self.total_events.store(event_count, Ordering::Relaxed);
        *self.state.write() = restored;
        Ok(())
    }
}

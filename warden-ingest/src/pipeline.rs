//! # Ingest Pipeline — Batch admission through broadcast
//!
//! One batch flows: admission control → participant upsert → recent-context
//! reads → batch typing statistics → per-event scoring with counter updates
//! → bulk event append → typing-pattern update → participant score
//! recomputation → alert evaluation → live fan-out.
//!
//! Admission failures reject before any store write. After that the pipeline
//! favours forward progress: individual event rows may fail to persist
//! without rolling back counter updates (at-least-once contract).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::error::{WardenError, WardenResult};
use warden_core::live::LiveFabric;
use warden_core::store::StoreGateway;
use warden_core::types::{
    now_ms, Alert, BatchTypingStats, EventKind, EventRecord, ParticipantStats, RecentContext,
};

use crate::rate_limiter::IngestRateLimiter;
use crate::scorer;
use crate::validator::{self, IngestBatch};

/// Clipboard look-back for the recent context.
const CLIPBOARD_WINDOW_MS: i64 = 60_000;

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub participant_score: f64,
    pub processed: usize,
    pub alert: Option<Alert>,
}

pub struct IngestPipeline {
    store: Arc<dyn StoreGateway>,
    fabric: Arc<LiveFabric>,
    limiter: IngestRateLimiter,
    batches_processed: AtomicU64,
    alerts_emitted: AtomicU64,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn StoreGateway>, fabric: Arc<LiveFabric>) -> Self {
        Self {
            store,
            fabric,
            limiter: IngestRateLimiter::default(),
            batches_processed: AtomicU64::new(0),
            alerts_emitted: AtomicU64::new(0),
        }
    }

    pub fn with_limiter(mut self, limiter: IngestRateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Run one batch through the pipeline. `peer` is the source address,
    /// used as the rate-limit key when the payload carries no machine id.
    pub fn ingest(&self, batch: IngestBatch, peer: Option<&str>) -> WardenResult<IngestOutcome> {
        // 1. Admission: rate limits and validation, before any store I/O.
        let limit_key = batch
            .participant
            .machine_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| peer.map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        self.limiter.check(&limit_key)?;
        let batch = validator::validate(batch)?;

        // 2. Upsert the participant.
        let participant =
            self.store
                .upsert_participant(&batch.machine_id, &batch.session_id, batch.workspace.as_deref());

        // 3. Recent context: clipboard activity and typing history.
        let now = now_ms();
        let context = RecentContext {
            clipboard_changes_60s: self
                .store
                .recent_clipboard_count(&participant.machine_id, now - CLIPBOARD_WINDOW_MS),
            had_typing_before: self.store.has_any_typing_event(&participant.machine_id),
        };

        // 4. Batch-local typing statistics.
        let typing_stats = BatchTypingStats::from_intervals(&batch.typing_intervals);

        // 5. Score every event and accumulate the counter deltas.
        let mut delta = ParticipantStats::default();
        let mut records = Vec::with_capacity(batch.events.len());
        for event in &batch.events {
            let scored = scorer::score_event(event.kind, &event.data, &typing_stats, &context);
            if scored.flagged {
                debug!(
                    participant = %participant.machine_id,
                    kind = %event.kind.as_str(),
                    score = scored.score,
                    reasons = ?scored.reasons,
                    "Flagged event"
                );
            }
            apply_counter_delta(&mut delta, event.kind, &event.data);
            records.push(EventRecord {
                id: uuid::Uuid::new_v4().to_string(),
                participant_id: participant.machine_id.clone(),
                kind: event.kind,
                timestamp: event.timestamp,
                data: event.data.clone(),
                suspicion_score: scored.score,
                flagged: scored.flagged,
            });
        }
        let processed = records.len();

        // 6. Bulk append; row failures never roll back counters.
        self.store.append_events(&participant.machine_id, records);

        // 7. Typing pattern update.
        if !batch.typing_intervals.is_empty() {
            self.store.update_typing_pattern(&participant.machine_id, &batch.typing_intervals);
        }

        // 8. Apply counters and recompute the participant score under the
        // store's single-writer lock.
        let updated = self
            .store
            .update_participant(&participant.machine_id, &mut |p| {
                p.stats.paste_count += delta.paste_count;
                p.stats.paste_chars_total += delta.paste_chars_total;
                p.stats.typing_anomalies += delta.typing_anomalies;
                p.stats.window_blur_count += delta.window_blur_count;
                p.stats.window_blur_total_ms += delta.window_blur_total_ms;
                p.stats.clipboard_changes += delta.clipboard_changes;
                p.stats.files_created += delta.files_created;
                p.stats.files_deleted += delta.files_deleted;
                p.total_events += processed as u64;
                p.suspicion_score = scorer::participant_score(&p.stats);
                if now > p.last_active {
                    p.last_active = now;
                }
            })
            .ok_or_else(|| {
                WardenError::StoreUnavailable(format!(
                    "participant {} vanished mid-batch",
                    participant.machine_id
                ))
            })?;

        // 9. Alert evaluation and fan-out.
        let evaluation = scorer::evaluate_alert(&updated);
        let alert = if evaluation.should_alert {
            let alert = scorer::build_alert(&updated, &evaluation);
            warn!(
                participant = %updated.machine_id,
                level = ?evaluation.level,
                score = updated.suspicion_score,
                reasons = ?evaluation.reasons,
                "Participant alert"
            );
            self.fabric.publish_alert(&alert);
            self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
            Some(alert)
        } else {
            None
        };

        // 10. Always push the updated participant to observers.
        self.fabric.publish_participant_update(&updated);

        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        info!(
            participant = %updated.machine_id,
            events = processed,
            score = updated.suspicion_score,
            "Batch ingested"
        );

        // 11. Report back to the agent.
        Ok(IngestOutcome { participant_score: updated.suspicion_score, processed, alert })
    }

    pub fn batches_processed(&self) -> u64 {
        self.batches_processed.load(Ordering::Relaxed)
    }

    pub fn alerts_emitted(&self) -> u64 {
        self.alerts_emitted.load(Ordering::Relaxed)
    }

    pub fn rate_limiter(&self) -> &IngestRateLimiter {
        &self.limiter
    }
}

/// Counter mutations per event kind. Pure bookkeeping; scoring policy lives
/// in the scorer.
fn apply_counter_delta(delta: &mut ParticipantStats, kind: EventKind, data: &serde_json::Value) {
    use warden_core::types::{data_str, data_u64};
    match kind {
        EventKind::Paste => {
            delta.paste_count += 1;
            delta.paste_chars_total += data_u64(data, "length").unwrap_or(0);
        }
        EventKind::Typing => {
            if data.get("anomaly").map_or(false, |v| !v.is_null()) {
                delta.typing_anomalies += 1;
            }
        }
        EventKind::WindowBlur => {
            if data.get("focused").and_then(|v| v.as_bool()) == Some(false) {
                delta.window_blur_count += 1;
                delta.window_blur_total_ms += data_u64(data, "unfocusedDurationMs").unwrap_or(0);
            }
        }
        EventKind::Clipboard => {
            delta.clipboard_changes += 1;
        }
        EventKind::FileOperation => match data_str(data, "operation") {
            Some("create") => delta.files_created += 1,
            Some("delete") => delta.files_deleted += 1,
            _ => {}
        },
        EventKind::FileChange => {}
    }
}

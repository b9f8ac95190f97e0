//! Ingest payload shapes and semantic validation.
//!
//! Deserialization strips unknown fields; validation then enforces the
//! batch limits and field constraints, collecting every violation so the
//! agent gets one complete field-level report.

use serde::Deserialize;
use warden_core::error::{FieldViolation, WardenError, WardenResult};
use warden_core::types::EventKind;

pub const MAX_EVENTS_PER_BATCH: usize = 500;
pub const MAX_TYPING_SAMPLES: usize = 5_000;
pub const MAX_MACHINE_ID_CHARS: usize = 200;
/// Serialized byte budget for one event's `data` object.
pub const MAX_DATA_BYTES: usize = 10 * 1024;

// ── Wire shapes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestBatch {
    #[serde(default)]
    pub events: Vec<RawEvent>,
    #[serde(default)]
    pub typing_pattern: Vec<TypingSample>,
    #[serde(default)]
    pub participant: ParticipantIdentity,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(default)]
    pub kind: String,
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub user_id: Option<String>,
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSample {
    pub timestamp: Option<i64>,
    pub interval: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantIdentity {
    pub machine_id: Option<String>,
    pub workspace: Option<String>,
    pub session_id: Option<String>,
}

// ── Validated shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ValidEvent {
    pub kind: EventKind,
    pub timestamp: i64,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ValidBatch {
    pub machine_id: String,
    pub session_id: String,
    pub workspace: Option<String>,
    pub events: Vec<ValidEvent>,
    pub typing_intervals: Vec<f64>,
}

/// Validate a deserialized batch, collecting every field violation.
pub fn validate(batch: IngestBatch) -> WardenResult<ValidBatch> {
    let mut violations = Vec::new();

    let machine_id = batch.participant.machine_id.clone().unwrap_or_default();
    if machine_id.is_empty() {
        violations.push(FieldViolation::new("participant.machineId", "required"));
    } else if machine_id.chars().count() > MAX_MACHINE_ID_CHARS {
        violations.push(FieldViolation::new(
            "participant.machineId",
            format!("longer than {} characters", MAX_MACHINE_ID_CHARS),
        ));
    }

    if batch.events.len() > MAX_EVENTS_PER_BATCH {
        violations.push(FieldViolation::new(
            "events",
            format!("{} events exceeds the {} per-batch cap", batch.events.len(), MAX_EVENTS_PER_BATCH),
        ));
    }
    if batch.typing_pattern.len() > MAX_TYPING_SAMPLES {
        violations.push(FieldViolation::new(
            "typingPattern",
            format!("{} samples exceeds the {} cap", batch.typing_pattern.len(), MAX_TYPING_SAMPLES),
        ));
    }

    let mut events = Vec::with_capacity(batch.events.len().min(MAX_EVENTS_PER_BATCH));
    for (i, raw) in batch.events.iter().take(MAX_EVENTS_PER_BATCH).enumerate() {
        let Some(kind) = EventKind::parse(&raw.kind) else {
            violations.push(FieldViolation::new(
                format!("events[{}].kind", i),
                format!("unknown kind '{}'", raw.kind),
            ));
            continue;
        };
        let Some(timestamp) = raw.timestamp else {
            violations.push(FieldViolation::new(
                format!("events[{}].timestamp", i),
                "required integer milliseconds",
            ));
            continue;
        };
        if !raw.data.is_object() && !raw.data.is_null() {
            violations.push(FieldViolation::new(format!("events[{}].data", i), "must be an object"));
            continue;
        }
        let data_bytes = serde_json::to_vec(&raw.data).map(|v| v.len()).unwrap_or(usize::MAX);
        if data_bytes > MAX_DATA_BYTES {
            violations.push(FieldViolation::new(
                format!("events[{}].data", i),
                format!("{} bytes exceeds the {} byte cap", data_bytes, MAX_DATA_BYTES),
            ));
            continue;
        }
        let data = if raw.data.is_null() { serde_json::json!({}) } else { raw.data.clone() };
        events.push(ValidEvent { kind, timestamp, data });
    }

    let mut typing_intervals = Vec::with_capacity(batch.typing_pattern.len().min(MAX_TYPING_SAMPLES));
    for (i, sample) in batch.typing_pattern.iter().take(MAX_TYPING_SAMPLES).enumerate() {
        match sample.interval {
            Some(interval) if interval.is_finite() && interval >= 0.0 => {
                typing_intervals.push(interval);
            }
            _ => violations.push(FieldViolation::new(
                format!("typingPattern[{}].interval", i),
                "required non-negative number",
            )),
        }
    }

    if !violations.is_empty() {
        return Err(WardenError::ValidationFailed { violations });
    }

    Ok(ValidBatch {
        machine_id,
        session_id: batch.participant.session_id.unwrap_or_default(),
        workspace: batch.participant.workspace,
        events,
        typing_intervals,
    })
}

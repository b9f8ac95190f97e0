//! Suspicion scoring: per-event, per-participant, and alert evaluation.
//!
//! All scoring is pure. Event scores accumulate additive contributions,
//! clamp at 1.0, and round to three decimals; an event is flagged at 0.5.
//! The participant score is a deterministic function of the aggregate
//! counters alone, recomputed on every ingest and never edited externally.

use warden_core::types::{
    data_bool, data_f64, data_str, data_u64, round3, Alert, AlertEvaluation, AlertLevel,
    BatchTypingStats, EventKind, Participant, RecentContext,
};

/// Events scoring at or above this are flagged.
pub const FLAG_THRESHOLD: f64 = 0.5;

/// Paste length above which the large-paste contribution applies.
const LARGE_PASTE_CHARS: u64 = 500;
/// Paste length above which the medium-paste contribution applies.
const MEDIUM_PASTE_CHARS: u64 = 100;
/// Keystroke intervals under this many milliseconds read as automation.
const FAST_TYPING_MS: f64 = 30.0;
/// Batch variance above this reads as paste-interleaved typing.
const HIGH_VARIANCE: f64 = 15_000.0;
/// Unfocused time above which a blur event contributes.
const LONG_BLUR_MS: u64 = 120_000;
/// Clipboard changes per minute above which a clipboard event contributes.
const CLIPBOARD_BURST_PER_MIN: u64 = 5;

/// Participant-score thresholds (see [`participant_score`]).
const ALERT_SCORE_THRESHOLD: f64 = 0.7;
const ALERT_PASTE_COUNT: u64 = 10;
const ALERT_BLUR_TOTAL_MS: u64 = 600_000;

#[derive(Debug, Clone)]
pub struct EventScore {
    pub score: f64,
    pub reasons: Vec<String>,
    pub flagged: bool,
}

/// Score one event given the batch's typing statistics and the
/// participant's recent context.
pub fn score_event(
    kind: EventKind,
    data: &serde_json::Value,
    typing: &BatchTypingStats,
    context: &RecentContext,
) -> EventScore {
    let mut score: f64 = 0.0;
    let mut reasons = Vec::new();

    if kind == EventKind::Paste {
        let length = data_u64(data, "length").unwrap_or(0);
        if length > LARGE_PASTE_CHARS {
            score += 0.9;
            reasons.push("large_paste".to_string());
        } else if length > MEDIUM_PASTE_CHARS {
            score += 0.6;
            reasons.push("medium_paste".to_string());
        }
    }

    if kind == EventKind::Typing {
        let anomaly = data_str(data, "anomaly");
        let interval = data_f64(data, "interval").unwrap_or(0.0);
        if anomaly == Some("fast_typing") && interval > 0.0 && interval < FAST_TYPING_MS {
            score += 0.4;
            reasons.push("fast_typing".to_string());
        }
    }

    if typing.avg_interval > 0.0 && typing.avg_interval < FAST_TYPING_MS {
        score += 0.4;
        reasons.push("avg_typing_too_fast".to_string());
    }
    if typing.variance > HIGH_VARIANCE {
        score += 0.3;
        reasons.push("high_variance".to_string());
    }

    if kind == EventKind::WindowBlur {
        let focused = data_bool(data, "focused").unwrap_or(true);
        let unfocused_ms = data_u64(data, "unfocusedDurationMs").unwrap_or(0);
        if !focused && unfocused_ms > LONG_BLUR_MS {
            score += 0.2;
            reasons.push("long_blur".to_string());
        }
    }

    if kind == EventKind::Clipboard && context.clipboard_changes_60s > CLIPBOARD_BURST_PER_MIN {
        score += 0.3;
        reasons.push("clipboard_burst".to_string());
    }

    if kind == EventKind::FileOperation
        && data_str(data, "operation") == Some("create")
        && !context.had_typing_before
    {
        score += 0.5;
        reasons.push("file_created_no_typing".to_string());
    }

    let score = round3(score.min(1.0));
    EventScore { score, reasons, flagged: score >= FLAG_THRESHOLD }
}

/// Participant suspicion score from the aggregate counters.
pub fn participant_score(stats: &warden_core::types::ParticipantStats) -> f64 {
    let mut score = (0.18 * ((stats.paste_count + 1) as f64).log10()).min(0.5);
    if stats.paste_chars_total > 1_000 {
        score += (stats.paste_chars_total as f64 / 10_000.0).min(0.3);
    }
    if stats.typing_anomalies > 5 {
        score += (stats.typing_anomalies as f64 / 100.0).min(0.2);
    }
    if stats.window_blur_total_ms > ALERT_BLUR_TOTAL_MS {
        score += 0.15;
    }
    if stats.clipboard_changes > 20 {
        score += (stats.clipboard_changes as f64 / 200.0).min(0.15);
    }
    round3(score.min(1.0))
}

/// Evaluate the alert thresholds against an updated participant.
pub fn evaluate_alert(participant: &Participant) -> AlertEvaluation {
    let mut reasons = Vec::new();
    let critical = participant.suspicion_score > ALERT_SCORE_THRESHOLD;
    if critical {
        reasons.push(format!("suspicion_score={:.3}", participant.suspicion_score));
    }
    let heavy_pasting = participant.stats.paste_count > ALERT_PASTE_COUNT;
    if heavy_pasting {
        reasons.push(format!("paste_count={}", participant.stats.paste_count));
    }
    let long_unfocused = participant.stats.window_blur_total_ms > ALERT_BLUR_TOTAL_MS;
    if long_unfocused {
        reasons.push(format!("window_blur_total_ms={}", participant.stats.window_blur_total_ms));
    }

    let level = if critical {
        AlertLevel::Critical
    } else if heavy_pasting || long_unfocused {
        AlertLevel::Warning
    } else {
        AlertLevel::None
    };
    AlertEvaluation { level, reasons, should_alert: level != AlertLevel::None }
}

/// Build the broadcastable alert for an evaluation that fired.
pub fn build_alert(participant: &Participant, evaluation: &AlertEvaluation) -> Alert {
    Alert {
        id: uuid::Uuid::new_v4().to_string(),
        participant_id: participant.machine_id.clone(),
        display_name: participant.display_name().to_string(),
        level: evaluation.level,
        reasons: evaluation.reasons.clone(),
        score: participant.suspicion_score,
        timestamp: warden_core::types::now_ms(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::types::ParticipantStats;

    fn quiet() -> (BatchTypingStats, RecentContext) {
        (BatchTypingStats::default(), RecentContext { clipboard_changes_60s: 0, had_typing_before: true })
    }

    #[test]
    fn test_paste_length_boundaries() {
        let (typing, ctx) = quiet();
        let at_500 = score_event(EventKind::Paste, &json!({"length": 500}), &typing, &ctx);
        assert_eq!(at_500.score, 0.6);
        assert_eq!(at_500.reasons, vec!["medium_paste"]);

        let at_501 = score_event(EventKind::Paste, &json!({"length": 501}), &typing, &ctx);
        assert_eq!(at_501.score, 0.9);
        assert_eq!(at_501.reasons, vec!["large_paste"]);
        assert!(at_501.flagged);

        let at_100 = score_event(EventKind::Paste, &json!({"length": 100}), &typing, &ctx);
        assert_eq!(at_100.score, 0.0);
        assert!(!at_100.flagged);
    }

    #[test]
    fn test_paste_elapsed_is_telemetry_only() {
        let (typing, ctx) = quiet();
        let scored =
            score_event(EventKind::Paste, &json!({"length": 50, "elapsed": 3}), &typing, &ctx);
        assert_eq!(scored.score, 0.0);
    }

    #[test]
    fn test_fast_typing_anomaly() {
        let (typing, ctx) = quiet();
        let fast = score_event(
            EventKind::Typing,
            &json!({"anomaly": "fast_typing", "interval": 12.0}),
            &typing,
            &ctx,
        );
        assert_eq!(fast.score, 0.4);
        assert_eq!(fast.reasons, vec!["fast_typing"]);

        let slow = score_event(
            EventKind::Typing,
            &json!({"anomaly": "fast_typing", "interval": 45.0}),
            &typing,
            &ctx,
        );
        assert_eq!(slow.score, 0.0);

        let zero = score_event(
            EventKind::Typing,
            &json!({"anomaly": "fast_typing", "interval": 0.0}),
            &typing,
            &ctx,
        );
        assert_eq!(zero.score, 0.0);
    }

    #[test]
    fn test_batch_typing_stats_contributions() {
        let ctx = RecentContext { clipboard_changes_60s: 0, had_typing_before: true };
        let fast_avg = BatchTypingStats { avg_interval: 20.0, variance: 0.0 };
        let scored = score_event(EventKind::Typing, &json!({}), &fast_avg, &ctx);
        assert_eq!(scored.score, 0.4);
        assert_eq!(scored.reasons, vec!["avg_typing_too_fast"]);

        let jittery = BatchTypingStats { avg_interval: 200.0, variance: 20_000.0 };
        let scored = score_event(EventKind::FileChange, &json!({}), &jittery, &ctx);
        assert_eq!(scored.score, 0.3);
        assert_eq!(scored.reasons, vec!["high_variance"]);
    }

    #[test]
    fn test_long_blur() {
        let (typing, ctx) = quiet();
        let long = score_event(
            EventKind::WindowBlur,
            &json!({"focused": false, "unfocusedDurationMs": 180_000}),
            &typing,
            &ctx,
        );
        assert_eq!(long.score, 0.2);
        assert_eq!(long.reasons, vec!["long_blur"]);

        let refocused = score_event(
            EventKind::WindowBlur,
            &json!({"focused": true, "unfocusedDurationMs": 180_000}),
            &typing,
            &ctx,
        );
        assert_eq!(refocused.score, 0.0);
    }

    #[test]
    fn test_clipboard_burst() {
        let typing = BatchTypingStats::default();
        let busy = RecentContext { clipboard_changes_60s: 6, had_typing_before: true };
        let scored = score_event(EventKind::Clipboard, &json!({}), &typing, &busy);
        assert_eq!(scored.score, 0.3);

        let calm = RecentContext { clipboard_changes_60s: 5, had_typing_before: true };
        let scored = score_event(EventKind::Clipboard, &json!({}), &typing, &calm);
        assert_eq!(scored.score, 0.0);
    }

    #[test]
    fn test_file_created_cold() {
        let typing = BatchTypingStats::default();
        let cold = RecentContext { clipboard_changes_60s: 0, had_typing_before: false };
        let scored =
            score_event(EventKind::FileOperation, &json!({"operation": "create"}), &typing, &cold);
        assert_eq!(scored.score, 0.5);
        assert!(scored.flagged);

        let warm = RecentContext { clipboard_changes_60s: 0, had_typing_before: true };
        let scored =
            score_event(EventKind::FileOperation, &json!({"operation": "create"}), &typing, &warm);
        assert_eq!(scored.score, 0.0);

        let delete =
            score_event(EventKind::FileOperation, &json!({"operation": "delete"}), &typing, &cold);
        assert_eq!(delete.score, 0.0);
    }

    #[test]
    fn test_contributions_clamp_at_one() {
        let typing = BatchTypingStats { avg_interval: 10.0, variance: 20_000.0 };
        let ctx = RecentContext { clipboard_changes_60s: 9, had_typing_before: false };
        let scored = score_event(EventKind::Paste, &json!({"length": 900}), &typing, &ctx);
        // 0.9 + 0.4 + 0.3 would exceed the ceiling.
        assert_eq!(scored.score, 1.0);
        assert!(scored.flagged);
    }

    #[test]
    fn test_participant_score_single_paste() {
        let stats = ParticipantStats { paste_count: 1, paste_chars_total: 600, ..Default::default() };
        // min(0.5, 0.18·log10(2)) = 0.0542 → 0.054; 600 chars stay under the
        // 1,000 activation floor.
        assert_eq!(participant_score(&stats), 0.054);
    }

    #[test]
    fn test_participant_score_components() {
        let stats = ParticipantStats {
            paste_count: 51,
            paste_chars_total: 20_600,
            ..Default::default()
        };
        let expected = round3((0.18f64 * 52f64.log10()).min(0.5) + 0.3);
        assert_eq!(participant_score(&stats), expected);

        let blurry = ParticipantStats { window_blur_total_ms: 700_000, ..Default::default() };
        assert_eq!(participant_score(&blurry), 0.15);

        let clipboard = ParticipantStats { clipboard_changes: 100, ..Default::default() };
        // 100/200 = 0.5, capped at 0.15.
        assert_eq!(participant_score(&clipboard), 0.15);

        let anomalous = ParticipantStats { typing_anomalies: 10, ..Default::default() };
        assert_eq!(participant_score(&anomalous), 0.1);
    }

    #[test]
    fn test_participant_score_in_unit_interval() {
        let extreme = ParticipantStats {
            paste_count: 1_000_000,
            paste_chars_total: u64::MAX / 2,
            typing_anomalies: 10_000,
            window_blur_count: 500,
            window_blur_total_ms: u64::MAX / 2,
            clipboard_changes: 100_000,
            files_created: 10,
            files_deleted: 10,
        };
        let score = participant_score(&extreme);
        assert!((0.0..=1.0).contains(&score));
        assert_eq!(participant_score(&ParticipantStats::default()), 0.0);
    }

    #[test]
    fn test_alert_levels() {
        let mut p = Participant::new("m-1", "s-1", None, 0);
        let none = evaluate_alert(&p);
        assert_eq!(none.level, AlertLevel::None);
        assert!(!none.should_alert);
        assert!(none.reasons.is_empty());

        p.stats.paste_count = 11;
        let warning = evaluate_alert(&p);
        assert_eq!(warning.level, AlertLevel::Warning);
        assert_eq!(warning.reasons, vec!["paste_count=11"]);

        p.suspicion_score = 0.75;
        let critical = evaluate_alert(&p);
        assert_eq!(critical.level, AlertLevel::Critical);
        assert!(critical.should_alert);
        assert_eq!(critical.reasons.len(), 2);

        p.suspicion_score = 0.7;
        // Exactly 0.7 is not critical.
        assert_eq!(evaluate_alert(&p).level, AlertLevel::Warning);
    }

    #[test]
    fn test_blur_total_triggers_warning() {
        let mut p = Participant::new("m-1", "s-1", None, 0);
        p.stats.window_blur_total_ms = 600_001;
        let eval = evaluate_alert(&p);
        assert_eq!(eval.level, AlertLevel::Warning);
        assert_eq!(eval.reasons, vec!["window_blur_total_ms=600001"]);
    }
}

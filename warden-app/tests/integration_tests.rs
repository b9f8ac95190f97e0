//! End-to-end scenarios for Contest Warden
//!
//! These tests exercise real multi-component flows over the in-memory store:
//! - ingest → scoring → counters → alert → live fan-out
//! - commit analysis → record merge → source suspicion score
//! - fingerprinting → cross-repo matching → bilateral record updates
//! - store snapshot/restore through the persistence manager

use serde_json::json;
use std::sync::Arc;

use warden_core::live::{LiveFabric, DASHBOARD_ROOM};
use warden_core::persistence::PersistenceManager;
use warden_core::store::{MemoryStore, StoreGateway};
use warden_core::types::{AlertLevel, CommitInfo, SourceAnalysisRecord};
use warden_ingest::pipeline::IngestPipeline;
use warden_ingest::validator::IngestBatch;
use warden_source::commit_analysis::{analyze_commits, source_suspicion_score};
use warden_source::fingerprint::{compare, compare_repositories, RepoFiles, SourceFile};
use warden_source::monitor::SourceMonitor;
use warden_source::remote::SourceHostClient;

fn engine() -> (Arc<MemoryStore>, Arc<LiveFabric>, IngestPipeline) {
    let store = Arc::new(MemoryStore::new());
    let fabric = Arc::new(LiveFabric::new());
    let pipeline = IngestPipeline::new(store.clone() as Arc<dyn StoreGateway>, fabric.clone());
    (store, fabric, pipeline)
}

fn batch(value: serde_json::Value) -> IngestBatch {
    serde_json::from_value(value).unwrap()
}

const MIN: i64 = 60 * 1000;

fn commit(id: &str, timestamp: i64, additions: i64, deletions: i64, files: i64, message: &str) -> CommitInfo {
    CommitInfo {
        id: id.into(),
        message: message.into(),
        timestamp,
        additions,
        deletions,
        files_changed: files,
    }
}

// ── Scenario 1: Clean participant ────────────────────────────────────────

#[test]
fn test_clean_participant_scores_zero_and_stays_quiet() {
    let (store, _fabric, pipeline) = engine();
    let events: Vec<_> = (0..100)
        .map(|i| json!({ "kind": "typing", "timestamp": 1_000 + i * 150, "data": { "char": "a" } }))
        .collect();
    let pattern: Vec<_> = (0..100)
        .map(|i| json!({ "timestamp": 1_000 + i * 150, "interval": 150.0 }))
        .collect();

    let outcome = pipeline
        .ingest(
            batch(json!({
                "events": events,
                "typingPattern": pattern,
                "participant": { "machineId": "m-clean", "sessionId": "s-1" }
            })),
            None,
        )
        .unwrap();

    assert_eq!(outcome.processed, 100);
    assert_eq!(outcome.participant_score, 0.0);
    assert!(outcome.alert.is_none());

    let p = store.get_participant("m-clean").unwrap();
    assert_eq!(p.stats.paste_count, 0);
    assert_eq!(p.stats.typing_anomalies, 0);
    assert_eq!(p.suspicion_score, 0.0);
    assert_eq!(pipeline.alerts_emitted(), 0);
}

// ── Scenario 2: Large paste flags the event, heavy pasting alerts ────────

#[tokio::test]
async fn test_large_paste_cascade_reaches_observers() {
    let (store, fabric, pipeline) = engine();
    let mut frames = fabric.subscribe();

    let outcome = pipeline
        .ingest(
            batch(json!({
                "events": [{ "kind": "paste", "timestamp": 1_000, "data": { "length": 600 } }],
                "participant": { "machineId": "m-flag", "sessionId": "s-1" }
            })),
            None,
        )
        .unwrap();
    assert_eq!(outcome.participant_score, 0.054);
    assert!(outcome.alert.is_none());

    let (events, _) = store.participant_events("m-flag", 1, 0, None, false);
    assert_eq!(events[0].suspicion_score, 0.9);
    assert!(events[0].flagged);

    // The participant-updated frame lands in the dashboard room.
    let frame = frames.recv().await.unwrap();
    assert_eq!(frame.room, DASHBOARD_ROOM);
    assert_eq!(frame.payload["frame"], "participant:updated");
    assert_eq!(frame.payload["participant"]["suspicionScore"], 0.054);

    // Fifty more pastes push paste_count past the warning threshold.
    let pastes: Vec<_> = (0..50)
        .map(|i| json!({ "kind": "paste", "timestamp": 2_000 + i, "data": { "length": 400 } }))
        .collect();
    let outcome = pipeline
        .ingest(
            batch(json!({
                "events": pastes,
                "participant": { "machineId": "m-flag", "sessionId": "s-1" }
            })),
            None,
        )
        .unwrap();

    let alert = outcome.alert.expect("alert after 51 pastes");
    assert_eq!(alert.level, AlertLevel::Warning);
    assert!(alert.reasons.iter().any(|r| r == "paste_count=51"));
    let p = store.get_participant("m-flag").unwrap();
    assert_eq!(p.stats.paste_count, 51);
    assert_eq!(p.stats.paste_chars_total, 600 + 50 * 400);

    // An alert frame follows the second batch's update frame.
    let mut saw_alert = false;
    while let Ok(frame) = frames.try_recv() {
        if frame.payload["frame"] == "alert" {
            saw_alert = true;
            assert_eq!(frame.payload["alert"]["level"], "warning");
        }
    }
    assert!(saw_alert);
}

// ── Scenario 3: Burst commits ────────────────────────────────────────────

#[test]
fn test_burst_commits_merge_into_record() {
    let store = MemoryStore::new();
    let commits = vec![
        commit("c1", 0, 10, 0, 1, "init"),
        commit("c2", 60_000, 20, 0, 1, "x"),
        commit("c3", 90_000, 30, 0, 1, "y"),
    ];
    let analysis = analyze_commits(&commits);
    assert_eq!(analysis.burst_commits.len(), 2);
    assert_eq!(analysis.avg_commit_score, 0.133);

    let mut record = store.get_or_create_source_analysis("p-burst", "alice", "solutions", "main");
    record.commit_stats = analysis.stats.clone();
    record.timing = analysis.timing.clone();
    record.suspicious_commits.extend(analysis.suspicious_commits.clone());
    record.burst_commits.extend(analysis.burst_commits.clone());
    record.avg_commit_suspicion_score = analysis.avg_commit_score;
    record.source_suspicion_score = source_suspicion_score(
        record.avg_commit_suspicion_score,
        record.idle_bursts.len(),
        record.highest_similarity,
    );
    let stored = store.persist_source_analysis(record);

    assert_eq!(stored.suspicious_commits.len(), 2);
    assert!(stored
        .suspicious_commits
        .iter()
        .all(|s| s.reasons.contains(&"burst_commit".to_string())));
    // 0.35 · 0.133 = 0.0466 → 0.047
    assert_eq!(stored.source_suspicion_score, 0.047);
}

// ── Scenario 4: Idle-then-burst ──────────────────────────────────────────

#[test]
fn test_idle_then_burst_detected() {
    let commits: Vec<_> = [0i64, 45, 46, 47, 48]
        .iter()
        .enumerate()
        .map(|(i, m)| commit(&format!("c{}", i), m * MIN, 5, 0, 1, "tweak"))
        .collect();
    let analysis = analyze_commits(&commits);
    assert_eq!(analysis.idle_bursts.len(), 1);
    assert_eq!(analysis.idle_bursts[0].burst_start, 45 * MIN);
    assert_eq!(analysis.idle_bursts[0].burst_commit_count, 4);
    assert_eq!(analysis.burst_commits.len(), 3);
}

// ── Scenario 5: Winnowing identity and near-duplication ──────────────────

#[test]
fn test_fingerprint_identity_and_normalised_equivalence() {
    let identical = compare(
        "function sum(a,b){ return a+b; }",
        "function sum(a,b){ return a+b; }",
    );
    assert_eq!(identical.similarity, 1.0);
    assert!(identical.identical_content);

    // Comment and whitespace-run differences vanish under normalisation.
    let variant = compare(
        "function sum(a,b){ return a+b; } // adds",
        "function  sum(a,b){\n\treturn a+b; }",
    );
    assert_eq!(variant.similarity, 1.0);
    assert!(variant.identical_content);
}

// ── Scenario 6: Cross-repo plagiarism cascade ────────────────────────────

#[test]
fn test_cross_repo_cascade_updates_both_records() {
    let store = Arc::new(MemoryStore::new());
    let fabric = Arc::new(LiveFabric::new());
    let client = SourceHostClient::new("http://127.0.0.1:1", "tok").unwrap();
    let monitor =
        SourceMonitor::new(store.clone() as Arc<dyn StoreGateway>, fabric, client, 0.8);

    store.get_or_create_source_analysis("p1", "alice", "repo-a", "main");
    store.get_or_create_source_analysis("p2", "bob", "repo-b", "main");

    let shared = "const lines = input.split('\\n'); let total = 0; for (const line of lines) { total += Number(line); } console.log(total);";
    let repos = vec![
        RepoFiles {
            repo_id: "p1".into(),
            files: vec![SourceFile { path: "index.js".into(), content: shared.into() }],
        },
        RepoFiles {
            repo_id: "p2".into(),
            files: vec![SourceFile { path: "index.js".into(), content: shared.into() }],
        },
    ];
    let matches = compare_repositories(&repos, 0.8);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].similarity, 1.0);
    assert!(matches[0].identical_content);

    assert_eq!(monitor.record_matches(&matches), 1);

    let a = store.get_source_analysis("p1").unwrap();
    let b = store.get_source_analysis("p2").unwrap();
    assert_eq!(a.highest_similarity, 1.0);
    assert_eq!(b.highest_similarity, 1.0);
    assert_eq!(a.similarity_matches.len(), 1);
    assert_eq!(b.similarity_matches.len(), 1);
    // File pair is swapped between the two sides.
    assert_eq!(a.similarity_matches[0].file, "index.js");
    assert_eq!(a.similarity_matches[0].other_participant_id, "p2");
    assert_eq!(b.similarity_matches[0].other_participant_id, "p1");
    // Both sides pick up the full plagiarism contribution.
    assert_eq!(a.source_suspicion_score, 0.4);
    assert_eq!(b.source_suspicion_score, 0.4);
}

// ── Store persistence across restarts ────────────────────────────────────

#[test]
fn test_store_survives_snapshot_restart() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(dir.path());
    manager.init().unwrap();

    let (store, _fabric, pipeline) = engine();
    pipeline
        .ingest(
            batch(json!({
                "events": [{ "kind": "paste", "timestamp": 1_000, "data": { "length": 600 } }],
                "participant": { "machineId": "m-persist", "sessionId": "s-1" }
            })),
            None,
        )
        .unwrap();
    manager.register(store.clone());
    manager.snapshot_component("warden-store").unwrap();

    // A fresh store restores the full participant state.
    let reborn = Arc::new(MemoryStore::new());
    let manager2 = PersistenceManager::new(dir.path());
    manager2.register(reborn.clone());
    assert!(manager2.restore_component("warden-store").unwrap());

    let p = reborn.get_participant("m-persist").unwrap();
    assert_eq!(p.stats.paste_count, 1);
    assert_eq!(p.suspicion_score, 0.054);
    let (events, total) = reborn.participant_events("m-persist", 10, 0, None, true);
    assert_eq!(total, 1);
    assert!(events[0].flagged);
}

// ── Analytics over a mixed population ────────────────────────────────────

#[test]
fn test_overview_and_suspicious_listing() {
    let (store, _fabric, pipeline) = engine();
    pipeline
        .ingest(
            batch(json!({
                "events": [{ "kind": "paste", "timestamp": 1_000, "data": { "length": 600 } }],
                "participant": { "machineId": "m-hot", "sessionId": "s-1" }
            })),
            None,
        )
        .unwrap();
    pipeline
        .ingest(
            batch(json!({
                "events": [{ "kind": "typing", "timestamp": 1_000, "data": {} }],
                "participant": { "machineId": "m-cold", "sessionId": "s-1" }
            })),
            None,
        )
        .unwrap();

    let overview = store.overview();
    assert_eq!(overview.total_participants, 2);
    assert_eq!(overview.total_events, 2);
    assert_eq!(overview.flagged_events, 1);
    assert_eq!(overview.avg_suspicion_score, 0.027);

    let suspicious = store.suspicious_participants(50);
    assert_eq!(suspicious.len(), 1);
    assert_eq!(suspicious[0].participant.machine_id, "m-hot");
    assert_eq!(suspicious[0].flagged_event_count, 1);
}

// ── Bounded lists hold under repeated syncs ──────────────────────────────

#[test]
fn test_bounded_lists_after_many_merges() {
    let store = MemoryStore::new();
    store.get_or_create_source_analysis("p-busy", "alice", "solutions", "main");

    for round in 0..30 {
        let base = round * 20;
        let commits: Vec<_> = (0..20)
            .map(|i| commit(&format!("c{}-{}", round, i), (base + i) as i64 * MIN / 2, 600, 0, 1, "x"))
            .collect();
        let analysis = analyze_commits(&commits);
        let mut record = store.get_source_analysis("p-busy").unwrap();
        record.suspicious_commits.extend(analysis.suspicious_commits);
        record.burst_commits.extend(analysis.burst_commits);
        record.idle_bursts.extend(analysis.idle_bursts);
        store.persist_source_analysis(record);
    }

    let record = store.get_source_analysis("p-busy").unwrap();
    assert!(record.suspicious_commits.len() <= SourceAnalysisRecord::MAX_SUSPICIOUS_COMMITS);
    assert!(record.burst_commits.len() <= SourceAnalysisRecord::MAX_BURST_COMMITS);
    assert_eq!(record.suspicious_commits.len(), SourceAnalysisRecord::MAX_SUSPICIOUS_COMMITS);
}

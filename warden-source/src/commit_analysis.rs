//! Structural and temporal suspicion analysis over a commit sequence.
//!
//! Input is a chronologically ordered commit list, oldest first. Output is
//! everything the source-analysis record stores: per-commit suspicion,
//! burst and idle-burst detection, an hour-of-day histogram, and aggregate
//! statistics. All scoring here is pure and cannot fail.

use chrono::{TimeZone, Timelike, Utc};
use warden_core::types::{
    round3, BurstCommit, CommitInfo, CommitStats, IdleBurst, SuspiciousCommit, TimingAnalysis,
};

/// Commits closer together than this form a burst.
pub const BURST_WINDOW_MS: i64 = 5 * 60 * 1000;
/// Gaps longer than this count as idle time.
pub const IDLE_GAP_MS: i64 = 30 * 60 * 1000;
/// Commits required after an idle gap, each within the burst window of its
/// predecessor, for the episode to count as an idle burst.
pub const IDLE_BURST_MIN_RUN: usize = 3;

/// Everything one analysis pass produces.
#[derive(Debug, Clone, Default)]
pub struct CommitAnalysis {
    pub suspicious_commits: Vec<SuspiciousCommit>,
    pub burst_commits: Vec<BurstCommit>,
    pub idle_bursts: Vec<IdleBurst>,
    pub stats: CommitStats,
    pub timing: TimingAnalysis,
    /// Mean per-commit suspicion score across the whole window.
    pub avg_commit_score: f64,
}

/// Score one commit against its predecessor. Contributions are independent
/// and additive, clamped to 1.0, rounded to three decimals.
pub fn score_commit(commit: &CommitInfo, predecessor: Option<&CommitInfo>) -> (f64, Vec<String>) {
    let mut score: f64 = 0.0;
    let mut reasons = Vec::new();
    let churn = commit.additions + commit.deletions;

    if churn > 500 && commit.message.trim().len() < 15 {
        score += 0.5;
        reasons.push("large_commit_short_msg".to_string());
    }
    if churn > 1000 {
        score += 0.3;
        reasons.push("very_large_commit".to_string());
    }
    if let Some(prev) = predecessor {
        let gap = commit.timestamp - prev.timestamp;
        if gap > 0 && gap < BURST_WINDOW_MS {
            score += 0.2;
            reasons.push("burst_commit".to_string());
        }
    }
    if commit.files_changed == 1 && commit.additions > 200 && commit.deletions < 10 {
        score += 0.4;
        reasons.push("single_file_bulk_add".to_string());
    }

    (round3(score.min(1.0)), reasons)
}

/// Run the full analysis over an ordered commit sequence (oldest first).
pub fn analyze_commits(commits: &[CommitInfo]) -> CommitAnalysis {
    if commits.is_empty() {
        return CommitAnalysis::default();
    }

    let mut analysis = CommitAnalysis::default();
    let mut score_sum = 0.0;

    for (i, commit) in commits.iter().enumerate() {
        let predecessor = if i > 0 { Some(&commits[i - 1]) } else { None };
        let (score, reasons) = score_commit(commit, predecessor);
        score_sum += score;
        if !reasons.is_empty() {
            analysis.suspicious_commits.push(SuspiciousCommit {
                commit_id: commit.id.clone(),
                message: commit.message.clone(),
                timestamp: commit.timestamp,
                score,
                reasons,
            });
        }

        if let Some(prev) = predecessor {
            let gap = commit.timestamp - prev.timestamp;
            analysis.timing.total_gap_ms += gap;
            if gap > 0 && gap < BURST_WINDOW_MS {
                analysis.burst_commits.push(BurstCommit {
                    commit_id: commit.id.clone(),
                    timestamp: commit.timestamp,
                    interval_ms: gap,
                });
            }
            if gap > IDLE_GAP_MS {
                // The commit ending the idle period starts a candidate run;
                // the run extends while each following gap stays under the
                // burst window.
                let mut run_end = i;
                while run_end + 1 < commits.len()
                    && commits[run_end + 1].timestamp - commits[run_end].timestamp < BURST_WINDOW_MS
                {
                    run_end += 1;
                }
                let followers = run_end - i;
                if followers >= IDLE_BURST_MIN_RUN {
                    analysis.idle_bursts.push(IdleBurst {
                        gap_ms: gap,
                        burst_start: commit.timestamp,
                        burst_commit_count: followers + 1,
                    });
                }
            }
        }

        if let Some(dt) = Utc.timestamp_millis_opt(commit.timestamp).single() {
            analysis.timing.hour_histogram[dt.hour() as usize] += 1;
        }
    }

    analysis.stats = aggregate_stats(commits);
    analysis.avg_commit_score = round3(score_sum / commits.len() as f64);
    analysis
}

fn aggregate_stats(commits: &[CommitInfo]) -> CommitStats {
    let n = commits.len() as i64;
    if n == 0 {
        return CommitStats::default();
    }
    let total_additions: i64 = commits.iter().map(|c| c.additions).sum();
    let total_deletions: i64 = commits.iter().map(|c| c.deletions).sum();
    let total_files_changed: i64 = commits.iter().map(|c| c.files_changed).sum();

    let positive_gaps: Vec<i64> = commits
        .windows(2)
        .map(|pair| pair[1].timestamp - pair[0].timestamp)
        .filter(|gap| *gap > 0)
        .collect();
    let avg_interval_ms = if positive_gaps.is_empty() {
        None
    } else {
        Some(
            (positive_gaps.iter().sum::<i64>() as f64 / positive_gaps.len() as f64).round() as i64,
        )
    };

    CommitStats {
        total_commits: commits.len() as u64,
        total_additions,
        total_deletions,
        total_files_changed,
        avg_additions: (total_additions as f64 / n as f64).round() as i64,
        avg_deletions: (total_deletions as f64 / n as f64).round() as i64,
        avg_files_changed: (total_files_changed as f64 / n as f64).round() as i64,
        avg_interval_ms,
    }
}

/// Aggregate source-suspicion score for a record:
/// `0.35 · avgCommitScore + min(0.25, 0.1 · idleBursts) + plagiarism`,
/// clamped to 1.0, rounded to three decimals.
pub fn source_suspicion_score(
    avg_commit_score: f64,
    idle_burst_count: usize,
    highest_similarity: f64,
) -> f64 {
    let plagiarism = if highest_similarity >= 0.8 {
        0.4
    } else if highest_similarity > 0.5 {
        0.3 * highest_similarity
    } else {
        0.0
    };
    let idle = (0.1 * idle_burst_count as f64).min(0.25);
    round3((0.35 * avg_commit_score + idle + plagiarism).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(id: &str, timestamp: i64, additions: i64, deletions: i64, files: i64, message: &str) -> CommitInfo {
        CommitInfo {
            id: id.to_string(),
            message: message.to_string(),
            timestamp,
            additions,
            deletions,
            files_changed: files,
        }
    }

    const MIN: i64 = 60 * 1000;

    #[test]
    fn test_burst_sequence_scenario() {
        // t=0, t=60s, t=90s — the second and third are bursts.
        let commits = vec![
            commit("c1", 0, 10, 0, 1, "init"),
            commit("c2", 60_000, 20, 0, 1, "x"),
            commit("c3", 90_000, 30, 0, 1, "y"),
        ];
        let analysis = analyze_commits(&commits);
        assert_eq!(analysis.burst_commits.len(), 2);
        assert_eq!(analysis.burst_commits[0].commit_id, "c2");
        assert_eq!(analysis.burst_commits[1].commit_id, "c3");
        assert_eq!(analysis.suspicious_commits.len(), 2);
        assert!(analysis
            .suspicious_commits
            .iter()
            .all(|s| s.reasons.contains(&"burst_commit".to_string())));
        assert_eq!(analysis.avg_commit_score, 0.133);
    }

    #[test]
    fn test_burst_boundary_exactly_five_minutes() {
        let first = commit("c1", 0, 1, 0, 1, "a");
        let at_boundary = commit("c2", 5 * MIN, 1, 0, 1, "b");
        let (score, reasons) = score_commit(&at_boundary, Some(&first));
        assert_eq!(score, 0.0);
        assert!(reasons.is_empty());

        let just_inside = commit("c3", 5 * MIN - 1000, 1, 0, 1, "c");
        let (score, reasons) = score_commit(&just_inside, Some(&first));
        assert_eq!(score, 0.2);
        assert_eq!(reasons, vec!["burst_commit"]);
    }

    #[test]
    fn test_out_of_order_predecessor_is_not_a_burst() {
        let first = commit("c1", 10 * MIN, 1, 0, 1, "a");
        let rewound = commit("c2", 9 * MIN, 1, 0, 1, "b");
        let (score, reasons) = score_commit(&rewound, Some(&first));
        assert_eq!(score, 0.0);
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_large_commit_short_message() {
        let c = commit("c1", 0, 400, 200, 3, "wip");
        let (score, reasons) = score_commit(&c, None);
        assert_eq!(score, 0.5);
        assert_eq!(reasons, vec!["large_commit_short_msg"]);

        let described = commit("c2", 0, 400, 200, 3, "refactor the parser module");
        let (score, _) = score_commit(&described, None);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_very_large_commit_stacks_with_short_message() {
        let c = commit("c1", 0, 900, 200, 3, "stuff");
        let (score, reasons) = score_commit(&c, None);
        assert_eq!(score, 0.8);
        assert_eq!(reasons, vec!["large_commit_short_msg", "very_large_commit"]);
    }

    #[test]
    fn test_single_file_bulk_add() {
        let c = commit("c1", 0, 250, 0, 1, "add solution file with everything");
        let (score, reasons) = score_commit(&c, None);
        assert_eq!(score, 0.4);
        assert_eq!(reasons, vec!["single_file_bulk_add"]);

        let spread = commit("c2", 0, 250, 0, 2, "add solution");
        let (score, _) = score_commit(&spread, None);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_idle_burst_scenario() {
        // Minutes 0, 45, 46, 47, 48: a 45-minute gap, then a four-commit run.
        let commits: Vec<_> = [0i64, 45, 46, 47, 48]
            .iter()
            .enumerate()
            .map(|(i, m)| commit(&format!("c{}", i), m * MIN, 5, 0, 1, "small change"))
            .collect();
        let analysis = analyze_commits(&commits);
        assert_eq!(analysis.idle_bursts.len(), 1);
        let idle = &analysis.idle_bursts[0];
        assert_eq!(idle.burst_start, 45 * MIN);
        assert_eq!(idle.gap_ms, 45 * MIN);
        assert_eq!(idle.burst_commit_count, 4);
        assert_eq!(analysis.burst_commits.len(), 3);
    }

    #[test]
    fn test_idle_burst_requires_three_followers() {
        // Gap then only two rapid commits: no idle burst.
        let commits: Vec<_> = [0i64, 45, 46, 47]
            .iter()
            .enumerate()
            .map(|(i, m)| commit(&format!("c{}", i), m * MIN, 5, 0, 1, "small change"))
            .collect();
        let analysis = analyze_commits(&commits);
        assert!(analysis.idle_bursts.is_empty());
        assert_eq!(analysis.burst_commits.len(), 2);
    }

    #[test]
    fn test_idle_burst_run_stops_at_slow_commit() {
        // 45-minute gap, two rapid commits, a 10-minute pause, more commits.
        let times = [0i64 * MIN, 45 * MIN, 46 * MIN, 47 * MIN, 57 * MIN, 58 * MIN];
        let commits: Vec<_> = times
            .iter()
            .enumerate()
            .map(|(i, t)| commit(&format!("c{}", i), *t, 5, 0, 1, "small change"))
            .collect();
        let analysis = analyze_commits(&commits);
        // Run after the gap is 45→46→47 (two followers), below the minimum.
        assert!(analysis.idle_bursts.is_empty());
    }

    #[test]
    fn test_gap_of_exactly_thirty_minutes_is_not_idle() {
        let commits: Vec<_> = [0i64, 30, 31, 32, 33]
            .iter()
            .enumerate()
            .map(|(i, m)| commit(&format!("c{}", i), m * MIN, 5, 0, 1, "small change"))
            .collect();
        let analysis = analyze_commits(&commits);
        assert!(analysis.idle_bursts.is_empty());
    }

    #[test]
    fn test_hour_histogram_and_total_gap() {
        // 1970-01-01 00:00 UTC and 01:30 UTC.
        let commits = vec![
            commit("c1", 0, 1, 0, 1, "a"),
            commit("c2", 90 * MIN, 1, 0, 1, "b"),
        ];
        let analysis = analyze_commits(&commits);
        assert_eq!(analysis.timing.hour_histogram[0], 1);
        assert_eq!(analysis.timing.hour_histogram[1], 1);
        assert_eq!(analysis.timing.total_gap_ms, 90 * MIN);
    }

    #[test]
    fn test_aggregate_stats() {
        let commits = vec![
            commit("c1", 0, 10, 2, 1, "a"),
            commit("c2", 2 * MIN, 20, 4, 3, "b"),
            commit("c3", 6 * MIN, 33, 0, 2, "c"),
        ];
        let analysis = analyze_commits(&commits);
        assert_eq!(analysis.stats.total_commits, 3);
        assert_eq!(analysis.stats.total_additions, 63);
        assert_eq!(analysis.stats.avg_additions, 21);
        assert_eq!(analysis.stats.avg_files_changed, 2);
        assert_eq!(analysis.stats.avg_interval_ms, Some(3 * MIN));
    }

    #[test]
    fn test_empty_input() {
        let analysis = analyze_commits(&[]);
        assert_eq!(analysis.stats.total_commits, 0);
        assert_eq!(analysis.stats.avg_interval_ms, None);
        assert_eq!(analysis.avg_commit_score, 0.0);
        assert!(analysis.suspicious_commits.is_empty());
    }

    #[test]
    fn test_rerun_is_deterministic() {
        let commits = vec![
            commit("c1", 0, 600, 0, 1, "x"),
            commit("c2", MIN, 20, 0, 1, "y"),
            commit("c3", 40 * MIN, 5, 0, 1, "z"),
        ];
        let a = analyze_commits(&commits);
        let b = analyze_commits(&commits);
        assert_eq!(a.avg_commit_score, b.avg_commit_score);
        assert_eq!(a.burst_commits.len(), b.burst_commits.len());
        assert_eq!(a.stats.total_additions, b.stats.total_additions);
        assert_eq!(a.timing.total_gap_ms, b.timing.total_gap_ms);
    }

    #[test]
    fn test_source_score_plagiarism_boundaries() {
        assert_eq!(source_suspicion_score(0.0, 0, 0.80), 0.4);
        assert_eq!(source_suspicion_score(0.0, 0, 0.79), round3(0.3 * 0.79));
        assert_eq!(source_suspicion_score(0.0, 0, 0.50), 0.0);
        assert_eq!(source_suspicion_score(0.0, 0, 1.0), 0.4);
    }

    #[test]
    fn test_source_score_idle_cap_and_clamp() {
        assert_eq!(source_suspicion_score(0.0, 2, 0.0), 0.2);
        assert_eq!(source_suspicion_score(0.0, 10, 0.0), 0.25);
        assert_eq!(source_suspicion_score(1.0, 10, 1.0), 1.0);
    }
}

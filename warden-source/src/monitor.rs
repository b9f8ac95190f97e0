//! Per-repository sync and cross-repository comparison.
//!
//! [`SourceMonitor`] owns the remote client and performs the work a sync
//! cycle is made of: incremental commit fetch + analysis merge for one
//! repository, and the all-pairs plagiarism scan. The periodic loop lives in
//! [`crate::scheduler`]; the HTTP surface calls the monitor directly for
//! on-demand syncs and comparisons.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use warden_core::error::{WardenError, WardenResult};
use warden_core::live::LiveFabric;
use warden_core::store::StoreGateway;
use warden_core::types::{now_ms, CommitInfo, SimilarityMatch, SourceAnalysisRecord};

use crate::commit_analysis::{analyze_commits, source_suspicion_score};
use crate::fingerprint::{compare_repositories, CrossRepoMatch, RepoFiles};
use crate::remote::SourceHostClient;

pub struct SourceMonitor {
    store: Arc<dyn StoreGateway>,
    fabric: Arc<LiveFabric>,
    client: SourceHostClient,
    similarity_threshold: f64,
}

impl SourceMonitor {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        fabric: Arc<LiveFabric>,
        client: SourceHostClient,
        similarity_threshold: f64,
    ) -> Self {
        Self { store, fabric, client, similarity_threshold }
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    /// Verify a repository is reachable, then create or refresh its
    /// analysis record.
    pub async fn register(
        &self,
        participant_id: &str,
        owner: &str,
        repo: &str,
    ) -> WardenResult<SourceAnalysisRecord> {
        let remote = self.client.get_repo(owner, repo).await?;
        let record = self.store.get_or_create_source_analysis(
            participant_id,
            owner,
            repo,
            &remote.default_branch,
        );
        info!(
            participant = %participant_id,
            repo = %format!("{}/{}", owner, repo),
            branch = %remote.default_branch,
            "Source repository registered"
        );
        Ok(record)
    }

    /// One incremental sync of one repository: fetch commits since the last
    /// cycle, stop at the last processed commit, analyse the new window, and
    /// merge the results into the record.
    pub async fn monitor_repository(&self, participant_id: &str) -> WardenResult<SourceAnalysisRecord> {
        let record = self
            .store
            .get_source_analysis(participant_id)
            .ok_or_else(|| WardenError::NotFound(format!("source analysis for {}", participant_id)))?;

        let listing = self
            .client
            .list_commits(&record.owner, &record.repo, record.last_sync_at)
            .await?;

        // Listing is newest first; the previously processed commit bounds
        // the incremental window.
        let mut new_commits = Vec::new();
        for summary in listing {
            if record.last_processed_commit_id.as_deref() == Some(summary.sha.as_str()) {
                break;
            }
            new_commits.push(summary);
        }

        let mut commits = Vec::with_capacity(new_commits.len());
        for summary in &new_commits {
            let stats = self.client.commit_stats(&record.owner, &record.repo, &summary.sha).await?;
            commits.push(CommitInfo {
                id: summary.sha.clone(),
                message: summary.message.clone(),
                timestamp: summary.timestamp,
                additions: stats.additions,
                deletions: stats.deletions,
                files_changed: stats.files_changed,
            });
        }
        commits.sort_by_key(|c| c.timestamp);

        let mut record = record;
        if !commits.is_empty() {
            let analysis = analyze_commits(&commits);
            record.commit_stats = analysis.stats;
            record.timing = analysis.timing;
            record.suspicious_commits.extend(analysis.suspicious_commits);
            record.burst_commits.extend(analysis.burst_commits);
            record.idle_bursts.extend(analysis.idle_bursts);
            record.avg_commit_suspicion_score = analysis.avg_commit_score;
            record.last_processed_commit_id = commits.last().map(|c| c.id.clone());
            info!(
                participant = %participant_id,
                repo = %format!("{}/{}", record.owner, record.repo),
                new_commits = commits.len(),
                suspicious = record.suspicious_commits.len(),
                "Repository synced"
            );
        }
        record.last_sync_at = Some(now_ms());
        record.source_suspicion_score = source_suspicion_score(
            record.avg_commit_suspicion_score,
            record.idle_bursts.len(),
            record.highest_similarity,
        );

        let stored = self.store.persist_source_analysis(record);
        self.fabric.publish_source_analysis(&stored);
        Ok(stored)
    }

    /// All-pairs plagiarism scan across every registered repository.
    /// Returns the number of matches recorded.
    pub async fn cross_compare_all(&self) -> usize {
        let records = self.store.list_registered_source_analyses();
        let repos = self.fetch_repo_files(&records).await;
        if repos.len() < 2 {
            return 0;
        }
        let matches = compare_repositories(&repos, self.similarity_threshold);
        self.record_matches(&matches)
    }

    /// On-demand comparison of two participants' repositories. Persists any
    /// matches to both sides.
    pub async fn compare_pair(
        &self,
        participant_a: &str,
        participant_b: &str,
        threshold: Option<f64>,
    ) -> WardenResult<Vec<CrossRepoMatch>> {
        let record_a = self
            .store
            .get_source_analysis(participant_a)
            .ok_or_else(|| WardenError::NotFound(format!("source analysis for {}", participant_a)))?;
        let record_b = self
            .store
            .get_source_analysis(participant_b)
            .ok_or_else(|| WardenError::NotFound(format!("source analysis for {}", participant_b)))?;

        let repos = self.fetch_repo_files(&[record_a, record_b]).await;
        if repos.len() < 2 {
            return Err(WardenError::RemoteUnavailable(
                "fewer than two repositories produced eligible files".into(),
            ));
        }
        let matches = compare_repositories(&repos, threshold.unwrap_or(self.similarity_threshold));
        self.record_matches(&matches);
        Ok(matches)
    }

    async fn fetch_repo_files(&self, records: &[SourceAnalysisRecord]) -> Vec<RepoFiles> {
        let mut repos = Vec::new();
        for record in records {
            match self
                .client
                .list_code_files(&record.owner, &record.repo, &record.default_branch)
                .await
            {
                Ok(files) if !files.is_empty() => {
                    repos.push(RepoFiles { repo_id: record.participant_id.clone(), files });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        participant = %record.participant_id,
                        repo = %format!("{}/{}", record.owner, record.repo),
                        error = %e,
                        "Skipping repository in comparison"
                    );
                }
            }
        }
        repos
    }

    /// Append each match to both sides (file pair swapped on the second
    /// side), raise `highest_similarity` monotonically, then recompute the
    /// source score of every affected record.
    pub fn record_matches(&self, matches: &[CrossRepoMatch]) -> usize {
        if matches.is_empty() {
            return 0;
        }
        let now = now_ms();
        let mut affected: HashSet<String> = HashSet::new();

        for m in matches {
            for (own, own_file, other, other_file) in [
                (&m.repo_a, &m.path_a, &m.repo_b, &m.path_b),
                (&m.repo_b, &m.path_b, &m.repo_a, &m.path_a),
            ] {
                let Some(mut record) = self.store.get_source_analysis(own) else {
                    // Weak reference: the counterpart side may be gone.
                    continue;
                };
                let (other_owner, other_repo) = self
                    .store
                    .get_source_analysis(other)
                    .map(|r| (r.owner, r.repo))
                    .unwrap_or_default();
                record.similarity_matches.push(SimilarityMatch {
                    other_participant_id: other.clone(),
                    other_owner,
                    other_repo,
                    file: own_file.clone(),
                    other_file: other_file.clone(),
                    similarity: m.similarity,
                    identical_content: m.identical_content,
                    detected_at: now,
                });
                record.raise_highest_similarity(m.similarity);
                self.store.persist_source_analysis(record);
                affected.insert(own.clone());
            }
            warn!(
                repo_a = %m.repo_a,
                repo_b = %m.repo_b,
                file_a = %m.path_a,
                file_b = %m.path_b,
                similarity = m.similarity,
                "Cross-repository similarity match"
            );
        }

        for participant_id in affected {
            if let Some(mut record) = self.store.get_source_analysis(&participant_id) {
                record.source_suspicion_score = source_suspicion_score(
                    record.avg_commit_suspicion_score,
                    record.idle_bursts.len(),
                    record.highest_similarity,
                );
                let stored = self.store.persist_source_analysis(record);
                self.fabric.publish_source_analysis(&stored);
            }
        }
        matches.len()
    }
}

//! REST client for the remote source host (GitHub-style API).
//!
//! Pulls commit listings, per-commit stats, and file contents for the sync
//! scheduler. Every call carries a hard timeout; timeouts and transport
//! failures map onto the engine error taxonomy so the scheduler can skip a
//! bad repository and keep the cycle going.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tracing::{debug, warn};
use warden_core::error::{WardenError, WardenResult};

use crate::fingerprint::{is_eligible_file, SourceFile, MAX_FILE_BYTES};

/// Hard timeout for any single remote call.
const REQUEST_TIMEOUT_SECS: u64 = 15;
/// Commits fetched per listing call (one page per sync cycle).
const COMMITS_PER_PAGE: usize = 100;
/// Eligible files fetched per repository per comparison pass.
const MAX_FILES_PER_REPO: usize = 200;

#[derive(Debug, Clone)]
pub struct RemoteRepo {
    pub default_branch: String,
}

/// A commit as listed, before stats are fetched.
#[derive(Debug, Clone)]
pub struct RemoteCommitSummary {
    pub sha: String,
    pub message: String,
    /// Author timestamp, epoch milliseconds.
    pub timestamp: i64,
}

/// Per-commit stats from the detail endpoint.
#[derive(Debug, Clone)]
pub struct RemoteCommitStats {
    pub additions: i64,
    pub deletions: i64,
    pub files_changed: i64,
}

// ── Wire DTOs ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RepoDto {
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct CommitListDto {
    sha: String,
    commit: CommitBodyDto,
}

#[derive(Deserialize)]
struct CommitBodyDto {
    message: String,
    author: Option<CommitAuthorDto>,
}

#[derive(Deserialize)]
struct CommitAuthorDto {
    date: Option<String>,
}

#[derive(Deserialize)]
struct CommitDetailDto {
    stats: Option<CommitStatsDto>,
    #[serde(default)]
    files: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct CommitStatsDto {
    #[serde(default)]
    additions: i64,
    #[serde(default)]
    deletions: i64,
}

#[derive(Deserialize)]
struct TreeDto {
    #[serde(default)]
    tree: Vec<TreeEntryDto>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntryDto {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    sha: String,
    size: Option<usize>,
}

#[derive(Deserialize)]
struct BlobDto {
    content: String,
    encoding: String,
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct SourceHostClient {
    http: reqwest::Client,
    api_base: String,
}

impl SourceHostClient {
    pub fn new(api_base: &str, token: &str) -> WardenResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| WardenError::Internal("source token contains invalid bytes".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("ContestWarden/0.3")
            .build()
            .map_err(|e| WardenError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, api_base: api_base.trim_end_matches('/').to_string() })
    }

    /// Probe a repository and return its default branch. Used to verify
    /// accessibility at registration time.
    pub async fn get_repo(&self, owner: &str, repo: &str) -> WardenResult<RemoteRepo> {
        let url = format!("{}/repos/{}/{}", self.api_base, owner, repo);
        let dto: RepoDto = self.get_json(&url).await?;
        Ok(RemoteRepo { default_branch: dto.default_branch.unwrap_or_else(|| "main".into()) })
    }

    /// List commits, newest first. `since_ms` bounds the listing to commits
    /// authored after that instant.
    pub async fn list_commits(
        &self,
        owner: &str,
        repo: &str,
        since_ms: Option<i64>,
    ) -> WardenResult<Vec<RemoteCommitSummary>> {
        let mut url = format!(
            "{}/repos/{}/{}/commits?per_page={}",
            self.api_base, owner, repo, COMMITS_PER_PAGE
        );
        if let Some(since) = since_ms {
            if let Some(dt) = chrono::DateTime::from_timestamp_millis(since) {
                url.push_str(&format!("&since={}", dt.to_rfc3339()));
            }
        }
        let listing: Vec<CommitListDto> = self.get_json(&url).await?;
        if listing.len() == COMMITS_PER_PAGE {
            debug!(owner = %owner, repo = %repo, "Commit listing page full; older commits deferred to later cycles");
        }
        Ok(listing
            .into_iter()
            .map(|dto| {
                let timestamp = dto
                    .commit
                    .author
                    .as_ref()
                    .and_then(|a| a.date.as_deref())
                    .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
                    .map(|d| d.timestamp_millis())
                    .unwrap_or(0);
                RemoteCommitSummary { sha: dto.sha, message: dto.commit.message, timestamp }
            })
            .collect())
    }

    /// Fetch additions/deletions/files-changed for one commit.
    pub async fn commit_stats(&self, owner: &str, repo: &str, sha: &str) -> WardenResult<RemoteCommitStats> {
        let url = format!("{}/repos/{}/{}/commits/{}", self.api_base, owner, repo, sha);
        let dto: CommitDetailDto = self.get_json(&url).await?;
        let stats = dto.stats.unwrap_or(CommitStatsDto { additions: 0, deletions: 0 });
        Ok(RemoteCommitStats {
            additions: stats.additions,
            deletions: stats.deletions,
            files_changed: dto.files.len() as i64,
        })
    }

    /// Fetch the code files of a branch, applying the scan eligibility rules
    /// (path exclusions, 100 KB cap) and the per-repo file budget.
    pub async fn list_code_files(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> WardenResult<Vec<SourceFile>> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_base, owner, repo, branch
        );
        let tree: TreeDto = self.get_json(&url).await?;
        if tree.truncated {
            warn!(owner = %owner, repo = %repo, "Remote tree listing truncated");
        }

        let eligible: Vec<&TreeEntryDto> = tree
            .tree
            .iter()
            .filter(|e| e.entry_type == "blob")
            .filter(|e| is_eligible_file(&e.path, e.size.unwrap_or(MAX_FILE_BYTES + 1)))
            .collect();
        if eligible.len() > MAX_FILES_PER_REPO {
            warn!(
                owner = %owner,
                repo = %repo,
                eligible = eligible.len(),
                cap = MAX_FILES_PER_REPO,
                "Repository exceeds file budget; extra files skipped"
            );
        }

        let mut files = Vec::new();
        for entry in eligible.into_iter().take(MAX_FILES_PER_REPO) {
            let blob_url = format!("{}/repos/{}/{}/git/blobs/{}", self.api_base, owner, repo, entry.sha);
            let blob: BlobDto = self.get_json(&blob_url).await?;
            if blob.encoding != "base64" {
                continue;
            }
            let raw: String = blob.content.chars().filter(|c| !c.is_whitespace()).collect();
            let Ok(bytes) = BASE64.decode(raw.as_bytes()) else {
                warn!(path = %entry.path, "Skipping blob with undecodable content");
                continue;
            };
            if bytes.len() > MAX_FILE_BYTES {
                continue;
            }
            match String::from_utf8(bytes) {
                Ok(content) => files.push(SourceFile { path: entry.path.clone(), content }),
                // Binary blob; nothing to fingerprint.
                Err(_) => continue,
            }
        }
        Ok(files)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> WardenResult<T> {
        let response = self.http.get(url).send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(WardenError::NotFound(format!("remote resource {}", url)));
        }
        if !status.is_success() {
            return Err(WardenError::RemoteUnavailable(format!("{} returned {}", url, status)));
        }
        response.json::<T>().await.map_err(map_transport_error)
    }
}

fn map_transport_error(e: reqwest::Error) -> WardenError {
    if e.is_timeout() {
        WardenError::RemoteTimeout(REQUEST_TIMEOUT_SECS * 1000)
    } else {
        WardenError::RemoteUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_with_and_without_token() {
        assert!(SourceHostClient::new("https://api.github.com", "").is_ok());
        assert!(SourceHostClient::new("https://api.github.com/", "tok_abc").is_ok());
        assert!(SourceHostClient::new("https://api.github.com", "bad\ntoken").is_err());
    }

    #[test]
    fn test_commit_listing_dto_shape() {
        let raw = r#"[{
            "sha": "abc123",
            "commit": {
                "message": "solve problem B",
                "author": { "date": "2026-06-01T10:30:00Z" }
            }
        }]"#;
        let parsed: Vec<CommitListDto> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed[0].sha, "abc123");
        assert_eq!(parsed[0].commit.message, "solve problem B");
    }

    #[test]
    fn test_commit_detail_dto_defaults() {
        let raw = r#"{ "files": [{}, {}] }"#;
        let parsed: CommitDetailDto = serde_json::from_str(raw).unwrap();
        assert!(parsed.stats.is_none());
        assert_eq!(parsed.files.len(), 2);
    }

    #[test]
    fn test_tree_dto_filters() {
        let raw = r#"{
            "tree": [
                { "path": "src/main.rs", "type": "blob", "sha": "s1", "size": 1200 },
                { "path": "node_modules/x.js", "type": "blob", "sha": "s2", "size": 10 },
                { "path": "src", "type": "tree", "sha": "s3", "size": null },
                { "path": "big.bin", "type": "blob", "sha": "s4", "size": 2000000 }
            ],
            "truncated": false
        }"#;
        let parsed: TreeDto = serde_json::from_str(raw).unwrap();
        let eligible: Vec<_> = parsed
            .tree
            .iter()
            .filter(|e| e.entry_type == "blob")
            .filter(|e| is_eligible_file(&e.path, e.size.unwrap_or(usize::MAX)))
            .collect();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].path, "src/main.rs");
    }
}

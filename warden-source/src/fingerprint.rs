//! Code fingerprinting for cross-repository plagiarism detection.
//!
//! Normalised source is hashed into k-gram FNV-1a fingerprints, thinned by
//! winnowing (Schleimer–Wilkerson–Aiken), and compared with Jaccard
//! similarity. A SHA-256 digest of the normalised text short-circuits exact
//! duplicates.
//!
//! The normalisation rules are a bit-exact schema: stored digests depend on
//! them, so changing any rule invalidates every stored fingerprint.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// K-gram length in characters.
pub const K_GRAM: usize = 25;
/// Winnowing window over the hash sequence.
pub const WINNOW_WINDOW: usize = 4;
/// Files above this byte count are never fingerprinted.
pub const MAX_FILE_BYTES: usize = 100_000;

/// Path fragments excluded from cross-repo scanning (generated or vendored
/// content that would swamp the comparison with false positives).
const SKIP_PATH_FRAGMENTS: &[&str] =
    &["node_modules/", "package-lock.json", ".min.", "vendor/", "dist/"];

static LINE_COMMENT: OnceLock<Regex> = OnceLock::new();
static BLOCK_COMMENT: OnceLock<Regex> = OnceLock::new();
static HASH_COMMENT: OnceLock<Regex> = OnceLock::new();
static WHITESPACE_RUN: OnceLock<Regex> = OnceLock::new();

/// A fingerprinted piece of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// SHA-256 hex of the normalised text.
    pub digest: String,
    /// Winnowed k-gram hashes; unordered, duplicate-free.
    pub fingerprints: BTreeSet<u32>,
    pub normalized_length: usize,
}

/// Result of a direct two-text comparison.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub similarity: f64,
    pub identical_content: bool,
}

/// One file of a repository handed to the cross-repo scan.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// All eligible files of one repository.
#[derive(Debug, Clone)]
pub struct RepoFiles {
    /// Opaque repo identity (the owning participant id in practice).
    pub repo_id: String,
    pub files: Vec<SourceFile>,
}

/// A cross-repository file pair at or above the scan threshold.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossRepoMatch {
    pub repo_a: String,
    pub path_a: String,
    pub repo_b: String,
    pub path_b: String,
    pub similarity: f64,
    pub identical_content: bool,
}

/// Normalise source text. Applied in a fixed order:
/// strip `//` line comments, strip `/* */` block comments (non-greedy),
/// strip `#` line comments, collapse whitespace runs to one space,
/// lowercase, trim.
pub fn normalize(source: &str) -> String {
    let line = LINE_COMMENT.get_or_init(|| Regex::new(r"//[^\n]*").expect("static regex"));
    let block = BLOCK_COMMENT.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("static regex"));
    let hash = HASH_COMMENT.get_or_init(|| Regex::new(r"#[^\n]*").expect("static regex"));
    let ws = WHITESPACE_RUN.get_or_init(|| Regex::new(r"\s+").expect("static regex"));

    let stripped = line.replace_all(source, "");
    let stripped = block.replace_all(&stripped, "");
    let stripped = hash.replace_all(&stripped, "");
    let collapsed = ws.replace_all(&stripped, " ");
    collapsed.to_lowercase().trim().to_string()
}

/// FNV-1a, 32-bit, over raw bytes.
fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Hash every k-gram of the text (character windows, byte-level hashing).
/// Text shorter than `k` yields a single hash of the whole text.
fn kgram_hashes(text: &str) -> Vec<u32> {
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;
    if char_count < K_GRAM {
        return vec![fnv1a32(text.as_bytes())];
    }
    (0..=char_count - K_GRAM)
        .map(|i| fnv1a32(text[boundaries[i]..boundaries[i + K_GRAM]].as_bytes()))
        .collect()
}

/// Winnow a hash sequence: minimum per window (leftmost on ties), emitted
/// only when it differs from the previously emitted minimum.
fn winnow(hashes: &[u32]) -> BTreeSet<u32> {
    let mut selected = BTreeSet::new();
    if hashes.is_empty() {
        return selected;
    }
    if hashes.len() <= WINNOW_WINDOW {
        if let Some(min) = hashes.iter().copied().min() {
            selected.insert(min);
        }
        return selected;
    }
    let mut last_emitted: Option<u32> = None;
    for window in hashes.windows(WINNOW_WINDOW) {
        let mut min = window[0];
        for &h in &window[1..] {
            if h < min {
                min = h;
            }
        }
        if last_emitted != Some(min) {
            selected.insert(min);
            last_emitted = Some(min);
        }
    }
    selected
}

/// Fingerprint raw source text.
pub fn fingerprint(source: &str) -> Fingerprint {
    let normalized = normalize(source);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hex::encode(hasher.finalize());
    let fingerprints = winnow(&kgram_hashes(&normalized));
    Fingerprint { digest, fingerprints, normalized_length: normalized.chars().count() }
}

/// Jaccard similarity between two fingerprints, with a digest short-circuit
/// for exact duplicates.
pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    if a.digest == b.digest {
        return 1.0;
    }
    match (a.fingerprints.is_empty(), b.fingerprints.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let intersection = a.fingerprints.intersection(&b.fingerprints).count();
            let union = a.fingerprints.union(&b.fingerprints).count();
            intersection as f64 / union as f64
        }
    }
}

/// Compare two raw texts directly.
pub fn compare(a: &str, b: &str) -> ComparisonResult {
    let fa = fingerprint(a);
    let fb = fingerprint(b);
    ComparisonResult { similarity: similarity(&fa, &fb), identical_content: fa.digest == fb.digest }
}

/// File extension for pairing: last `.`-separated segment, lowercased.
fn extension(path: &str) -> String {
    path.rsplit('.').next().unwrap_or(path).to_lowercase()
}

/// Whether a path is excluded from scanning.
pub fn is_excluded_path(path: &str) -> bool {
    SKIP_PATH_FRAGMENTS.iter().any(|fragment| path.contains(fragment))
}

/// Whether a file participates in the cross-repo scan at all.
pub fn is_eligible_file(path: &str, byte_len: usize) -> bool {
    byte_len <= MAX_FILE_BYTES && !is_excluded_path(path)
}

/// Scan every cross-repository file pair with matching extensions and return
/// those at or above `threshold`, sorted by similarity descending with a
/// stable `(repoA, repoB, pathA, pathB)` tiebreak.
pub fn compare_repositories(repos: &[RepoFiles], threshold: f64) -> Vec<CrossRepoMatch> {
    // Fingerprint every eligible file exactly once.
    let prepared: Vec<(usize, &SourceFile, String, Fingerprint)> = repos
        .iter()
        .enumerate()
        .flat_map(|(repo_idx, repo)| {
            repo.files
                .iter()
                .filter(|f| is_eligible_file(&f.path, f.content.len()))
                .map(move |f| (repo_idx, f, extension(&f.path), fingerprint(&f.content)))
        })
        .collect();

    let mut matches = Vec::new();
    for (i, (repo_a, file_a, ext_a, fp_a)) in prepared.iter().enumerate() {
        for (repo_b, file_b, ext_b, fp_b) in prepared.iter().skip(i + 1) {
            if repo_a == repo_b || ext_a != ext_b {
                continue;
            }
            let sim = similarity(fp_a, fp_b);
            if sim >= threshold {
                matches.push(CrossRepoMatch {
                    repo_a: repos[*repo_a].repo_id.clone(),
                    path_a: file_a.path.clone(),
                    repo_b: repos[*repo_b].repo_id.clone(),
                    path_b: file_b.path.clone(),
                    similarity: sim,
                    identical_content: fp_a.digest == fp_b.digest,
                });
            }
        }
    }
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.repo_a.cmp(&b.repo_a))
            .then_with(|| a.repo_b.cmp(&b.repo_b))
            .then_with(|| a.path_a.cmp(&b.path_a))
            .then_with(|| a.path_b.cmp(&b.path_b))
    });
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_comments_and_whitespace() {
        let source = "int Main() { // entry\n  /* multi\n line */ return 0;\n} # tail";
        assert_eq!(normalize(source), "int main() { return 0; }");
    }

    #[test]
    fn test_normalize_idempotent() {
        let source = "function  Sum(a, b) {\n\treturn a + b; // add\n}";
        let once = normalize(source);
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_fingerprint_of_normalized_matches() {
        let source = "function Sum(a,b){ return a+b; } // add";
        assert_eq!(fingerprint(source), fingerprint(&normalize(source)));
    }

    #[test]
    fn test_identity_similarity() {
        let fp = fingerprint("function sum(a,b){ return a+b; }");
        assert_eq!(similarity(&fp, &fp), 1.0);
    }

    #[test]
    fn test_commutativity() {
        let a = fingerprint("for (let i = 0; i < n; i++) { total += values[i]; }");
        let b = fingerprint("for (let j = 0; j < n; j++) { sum += values[j]; }");
        assert_eq!(similarity(&a, &b), similarity(&b, &a));
    }

    #[test]
    fn test_whitespace_runs_collapse_to_one_space() {
        let a = compare("function sum(a,b){ return a+b; }", "function  sum(a,b){\n\treturn a+b; }");
        assert_eq!(a.similarity, 1.0);
        assert!(a.identical_content);
        // Inserted spaces are content, not runs; they survive normalisation.
        let b = compare("function sum(a,b){ return a+b; }", "function sum ( a , b ) { return a + b ; }");
        assert!(!b.identical_content);
    }

    #[test]
    fn test_exact_duplicate() {
        let result =
            compare("function sum(a,b){ return a+b; }", "function sum(a,b){ return a+b; }");
        assert_eq!(result.similarity, 1.0);
        assert!(result.identical_content);
    }

    #[test]
    fn test_short_text_single_hash() {
        let fp = fingerprint("tiny");
        assert_eq!(fp.fingerprints.len(), 1);
    }

    #[test]
    fn test_empty_texts_are_identical() {
        let result = compare("", "");
        assert_eq!(result.similarity, 1.0);
        assert!(result.identical_content);
    }

    #[test]
    fn test_winnow_dedupes_repeated_minimum() {
        let hashes = vec![5, 9, 7, 8, 6, 9, 9, 9];
        let selected = winnow(&hashes);
        // Window mins: [5,9,7,8]=5 [9,7,8,6]=6 [7,8,6,9]=6 [8,6,9,9]=6 [6,9,9,9]=6
        assert_eq!(selected.into_iter().collect::<Vec<_>>(), vec![5, 6]);
    }

    #[test]
    fn test_excluded_paths() {
        assert!(is_excluded_path("node_modules/react/index.js"));
        assert!(is_excluded_path("src/app.min.js"));
        assert!(is_excluded_path("vendor/lib.go"));
        assert!(is_excluded_path("dist/bundle.js"));
        assert!(is_excluded_path("package-lock.json"));
        assert!(!is_excluded_path("src/main.rs"));
        assert!(!is_eligible_file("src/huge.c", MAX_FILE_BYTES + 1));
    }

    #[test]
    fn test_cross_repo_scan_requires_matching_extension() {
        let code = "function solve(input) { return input.split('\\n').map(Number).reduce((a, b) => a + b, 0); }";
        let repos = vec![
            RepoFiles {
                repo_id: "p1".into(),
                files: vec![SourceFile { path: "solution.js".into(), content: code.into() }],
            },
            RepoFiles {
                repo_id: "p2".into(),
                files: vec![
                    SourceFile { path: "solution.py".into(), content: code.into() },
                    SourceFile { path: "main.js".into(), content: code.into() },
                ],
            },
        ];
        let matches = compare_repositories(&repos, 0.8);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path_a, "solution.js");
        assert_eq!(matches[0].path_b, "main.js");
        assert_eq!(matches[0].similarity, 1.0);
        assert!(matches[0].identical_content);
    }

    #[test]
    fn test_cross_repo_scan_skips_same_repo_pairs() {
        let code = "let answer = values.iter().copied().max().unwrap_or(0); println!(\"{answer}\");";
        let repos = vec![RepoFiles {
            repo_id: "p1".into(),
            files: vec![
                SourceFile { path: "a.rs".into(), content: code.into() },
                SourceFile { path: "b.rs".into(), content: code.into() },
            ],
        }];
        assert!(compare_repositories(&repos, 0.5).is_empty());
    }

    #[test]
    fn test_cross_repo_sorted_by_similarity() {
        let shared = "function compute(values) { let total = 0; for (const v of values) total += v; return total; }";
        let variant = "function compute(values) { let product = 1; for (const v of values) product *= v; return product; }";
        let repos = vec![
            RepoFiles {
                repo_id: "p1".into(),
                files: vec![
                    SourceFile { path: "exact.js".into(), content: shared.into() },
                    SourceFile { path: "close.js".into(), content: variant.into() },
                ],
            },
            RepoFiles {
                repo_id: "p2".into(),
                files: vec![SourceFile { path: "theirs.js".into(), content: shared.into() }],
            },
        ];
        let matches = compare_repositories(&repos, 0.0);
        assert_eq!(matches.len(), 2);
        assert!(matches.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert_eq!(matches[0].path_a, "exact.js");
        assert_eq!(matches[0].similarity, 1.0);
        assert!(matches[1].similarity < 1.0);
    }
}

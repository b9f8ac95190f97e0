//! # Warden Source — Source-history analysis for Contest Warden
//!
//! Everything that looks at a participant's remote repository:
//! - [`fingerprint`]: winnowing-based code fingerprinting and cross-repo
//!   plagiarism scanning
//! - [`commit_analysis`]: temporal and structural commit-pattern detection
//! - [`remote`]: the source-host REST client
//! - [`monitor`]: per-repository incremental sync and cross-comparison
//! - [`scheduler`]: the periodic, self-coalescing sync worker

pub mod commit_analysis;
pub mod fingerprint;
pub mod monitor;
pub mod remote;
pub mod scheduler;

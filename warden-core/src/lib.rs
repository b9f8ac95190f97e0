//! # Warden Core — Shared model and infrastructure for Contest Warden
//!
//! Contest Warden is a real-time proctoring engine for programming contests.
//! This crate carries everything the detection crates share:
//! - the persisted data model (participants, events, typing patterns,
//!   source-analysis records, alerts)
//! - the error taxonomy and its HTTP mapping
//! - the store gateway contract and the in-memory store
//! - snapshot persistence for crash recovery
//! - the live fabric (room-based fan-out to dashboard observers)
//! - bearer-token minting and verification
//! - the TOML + environment configuration loader

pub mod auth;
pub mod config_loader;
pub mod error;
pub mod live;
pub mod persistence;
pub mod store;
pub mod types;

pub use error::{WardenError, WardenResult};

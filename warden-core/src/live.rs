//! # Live Fabric — Room-based fan-out to dashboard observers
//!
//! Observers join rooms (`dashboard`, or `participant:<id>`) and receive
//! participant updates, alerts, and source-analysis updates as JSON frames.
//! Delivery is best-effort: frames flow through a bounded broadcast channel,
//! slow observers lag and lose the oldest frames, and a producing request is
//! never blocked. No buffering or replay across reconnects.

use crate::types::{Alert, Participant, ParticipantSummary, SourceAnalysisRecord, SourceAnalysisSummary};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Frames queued per process before the slowest observer starts lagging.
const FABRIC_CAPACITY: usize = 256;

pub const DASHBOARD_ROOM: &str = "dashboard";

pub fn participant_room(participant_id: &str) -> String {
    format!("participant:{}", participant_id)
}

/// One outbound frame, addressed to a single room.
#[derive(Debug, Clone)]
pub struct LiveFrame {
    pub room: String,
    pub payload: serde_json::Value,
}

pub struct LiveFabric {
    tx: broadcast::Sender<LiveFrame>,
    total_published: AtomicU64,
    total_delivered: AtomicU64,
    total_dropped: AtomicU64,
}

impl Default for LiveFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveFabric {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FABRIC_CAPACITY);
        Self {
            tx,
            total_published: AtomicU64::new(0),
            total_delivered: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Subscribe an observer connection. The receiver sees every frame; the
    /// connection layer filters by its joined rooms.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveFrame> {
        self.tx.subscribe()
    }

    /// Push a participant summary to the dashboard room and the
    /// participant's own room.
    pub fn publish_participant_update(&self, participant: &Participant) {
        let summary = ParticipantSummary::from(participant);
        let payload = serde_json::json!({
            "frame": "participant:updated",
            "participant": summary,
        });
        self.publish(DASHBOARD_ROOM, payload.clone());
        self.publish(&participant_room(&participant.machine_id), payload);
    }

    /// Push an alert to the dashboard room.
    pub fn publish_alert(&self, alert: &Alert) {
        let payload = serde_json::json!({
            "frame": "alert",
            "alert": alert,
        });
        self.publish(DASHBOARD_ROOM, payload);
    }

    /// Push a source-analysis summary to the dashboard room and the owning
    /// participant's room.
    pub fn publish_source_analysis(&self, record: &SourceAnalysisRecord) {
        let summary = SourceAnalysisSummary::from(record);
        let payload = serde_json::json!({
            "frame": "sourceAnalysis:updated",
            "analysis": summary,
        });
        self.publish(DASHBOARD_ROOM, payload.clone());
        self.publish(&participant_room(&record.participant_id), payload);
    }

    fn publish(&self, room: &str, payload: serde_json::Value) {
        self.total_published.fetch_add(1, Ordering::Relaxed);
        let frame = LiveFrame { room: room.to_string(), payload };
        match self.tx.send(frame) {
            Ok(receivers) => {
                self.total_delivered.fetch_add(receivers as u64, Ordering::Relaxed);
            }
            Err(_) => {
                // No observers connected; frame evaporates by design.
                debug!(room = %room, "Live frame with no observers");
            }
        }
    }

    /// Record frames an observer lost by lagging.
    pub fn note_dropped(&self, count: u64) {
        self.total_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn total_published(&self) -> u64 {
        self.total_published.load(Ordering::Relaxed)
    }

    pub fn total_delivered(&self) -> u64 {
        self.total_delivered.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }
}

/// Room membership for one observer connection, driven by inbound intents.
#[derive(Debug, Default, Clone)]
pub struct RoomMembership {
    rooms: Vec<String>,
}

impl RoomMembership {
    /// Apply a raw inbound intent. Returns the room joined, if the intent
    /// was recognised.
    pub fn apply_intent(&mut self, intent: &str) -> Option<String> {
        let room = if intent == "join:dashboard" {
            DASHBOARD_ROOM.to_string()
        } else if let Some(id) = intent.strip_prefix("watch:participant:") {
            if id.is_empty() {
                return None;
            }
            participant_room(id)
        } else {
            return None;
        };
        if !self.rooms.contains(&room) {
            self.rooms.push(room.clone());
        }
        Some(room)
    }

    pub fn wants(&self, room: &str) -> bool {
        self.rooms.iter().any(|r| r == room)
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

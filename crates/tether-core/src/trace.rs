//! Action Trace
//!
//! Bounded per-session observation log plus a global duration-sample ring
//! used for percentile statistics. Mutations are append-only; eviction
//! subtracts the evicted entry's contribution so aggregates always reflect
//! exactly the retained window.

use crate::resolve::ResolutionMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const DEFAULT_SESSION_CAP: usize = 2_000;
pub const DEFAULT_SAMPLE_CAP: usize = 5_000;

/// One observation of a completed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_resolved: Option<ResolutionMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_dispatched: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waits_performed: Option<Vec<WaitRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertions_checked: Option<Vec<AssertionRecord>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitRecord {
    pub kind: String,
    pub waited_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssertionRecord {
    pub name: String,
    pub passed: bool,
}

/// Aggregate view over the retained window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStats {
    pub total_actions: u64,
    pub ok: u64,
    pub failed: u64,
    pub retries_total: u64,
    pub sessions: usize,
    pub per_action: HashMap<String, u64>,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

#[derive(Default)]
struct Aggregates {
    total: u64,
    ok: u64,
    failed: u64,
    retries_total: u64,
    per_action: HashMap<String, u64>,
}

impl Aggregates {
    fn add(&mut self, entry: &TraceEntry) {
        self.total += 1;
        if entry.ok {
            self.ok += 1;
        } else {
            self.failed += 1;
        }
        self.retries_total += u64::from(entry.retries);
        *self.per_action.entry(entry.action.clone()).or_insert(0) += 1;
    }

    fn subtract(&mut self, entry: &TraceEntry) {
        self.total = self.total.saturating_sub(1);
        if entry.ok {
            self.ok = self.ok.saturating_sub(1);
        } else {
            self.failed = self.failed.saturating_sub(1);
        }
        self.retries_total = self.retries_total.saturating_sub(u64::from(entry.retries));
        if let Some(count) = self.per_action.get_mut(&entry.action) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_action.remove(&entry.action);
            }
        }
    }
}

struct TraceState {
    sessions: HashMap<String, VecDeque<TraceEntry>>,
    samples: VecDeque<(String, u64)>,
    aggregates: Aggregates,
}

/// Process-local, self-bounding trace structure.
pub struct ActionTrace {
    session_cap: usize,
    sample_cap: usize,
    state: Mutex<TraceState>,
}

impl Default for ActionTrace {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAP, DEFAULT_SAMPLE_CAP)
    }
}

impl ActionTrace {
    pub fn new(session_cap: usize, sample_cap: usize) -> Self {
        Self {
            session_cap: session_cap.max(1),
            sample_cap: sample_cap.max(1),
            state: Mutex::new(TraceState {
                sessions: HashMap::new(),
                samples: VecDeque::new(),
                aggregates: Aggregates::default(),
            }),
        }
    }

    pub fn record(&self, session_id: &str, entry: TraceEntry) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        state
            .samples
            .push_back((session_id.to_string(), entry.duration_ms));
        if state.samples.len() > self.sample_cap {
            state.samples.pop_front();
        }

        state.aggregates.add(&entry);
        let ring = state
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(VecDeque::new);
        ring.push_back(entry);
        if ring.len() > self.session_cap {
            if let Some(evicted) = ring.pop_front() {
                state.aggregates.subtract(&evicted);
            }
        }
    }

    /// Retained entries for one session, oldest first.
    pub fn session_trace(&self, session_id: &str) -> Vec<TraceEntry> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(session_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop one session's entries and samples, subtracting each from the
    /// aggregates.
    pub fn clear_session(&self, session_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(ring) = state.sessions.remove(session_id) {
            for entry in &ring {
                state.aggregates.subtract(entry);
            }
        }
        state.samples.retain(|(sid, _)| sid != session_id);
    }

    pub fn stats(&self) -> TraceStats {
        let state = self.state.lock().unwrap();
        let mut durations: Vec<u64> = state.samples.iter().map(|(_, ms)| *ms).collect();
        durations.sort_unstable();
        TraceStats {
            total_actions: state.aggregates.total,
            ok: state.aggregates.ok,
            failed: state.aggregates.failed,
            retries_total: state.aggregates.retries_total,
            sessions: state.sessions.len(),
            per_action: state.aggregates.per_action.clone(),
            p50_ms: percentile(&durations, 50.0),
            p95_ms: percentile(&durations, 95.0),
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

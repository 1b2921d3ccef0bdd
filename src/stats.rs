use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::normalize::ZipCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Success,
    Failure,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    fn new(kind: LogKind, message: String) -> Self {
        Self {
            kind,
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Immutable copy of a session's aggregates, safe to hand to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub total_processed: usize,
    pub successful_geocodes: usize,
    pub cache_hits: usize,
    pub api_calls: usize,
    pub failed_geocodes: usize,
    pub cities_processed: Vec<String>,
    pub zip_codes_found: Vec<String>,
    pub current_address: String,
    pub progress_percent: u8,
    pub processing_complete: bool,
    pub state: SessionState,
    pub results_log: Vec<LogEntry>,
}

#[derive(Debug)]
struct SessionStats {
    total_processed: usize,
    successful_geocodes: usize,
    cache_hits: usize,
    api_calls: usize,
    failed_geocodes: usize,
    cities_processed: BTreeSet<String>,
    zip_codes_found: BTreeSet<ZipCode>,
    current_address: String,
    progress_percent: u8,
    state: SessionState,
    results_log: VecDeque<LogEntry>,
    log_capacity: usize,
}

impl SessionStats {
    fn push_log(&mut self, kind: LogKind, message: String) {
        if self.results_log.len() >= self.log_capacity {
            self.results_log.pop_front();
        }
        self.results_log.push_back(LogEntry::new(kind, message));
    }
}

/// Shared handle over one session's statistics.
///
/// The processing worker is the only writer; any number of pollers may call
/// [`StatsHandle::snapshot`] concurrently and receive detached copies.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    inner: Arc<Mutex<SessionStats>>,
}

impl StatsHandle {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionStats {
                total_processed: 0,
                successful_geocodes: 0,
                cache_hits: 0,
                api_calls: 0,
                failed_geocodes: 0,
                cities_processed: BTreeSet::new(),
                zip_codes_found: BTreeSet::new(),
                current_address: String::new(),
                progress_percent: 0,
                state: SessionState::Created,
                results_log: VecDeque::new(),
                log_capacity: log_capacity.max(1),
            })),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let stats = self.inner.lock();
        StatusSnapshot {
            total_processed: stats.total_processed,
            successful_geocodes: stats.successful_geocodes,
            cache_hits: stats.cache_hits,
            api_calls: stats.api_calls,
            failed_geocodes: stats.failed_geocodes,
            cities_processed: stats.cities_processed.iter().cloned().collect(),
            zip_codes_found: stats
                .zip_codes_found
                .iter()
                .map(|zip| zip.to_string())
                .collect(),
            current_address: stats.current_address.clone(),
            progress_percent: stats.progress_percent,
            processing_complete: stats.state == SessionState::Completed,
            state: stats.state,
            results_log: stats.results_log.iter().cloned().collect(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: SessionState) {
        self.inner.lock().state = state;
    }

    pub fn record_api_call(&self) {
        self.inner.lock().api_calls += 1;
    }

    pub fn record_cache_hit(&self) {
        self.inner.lock().cache_hits += 1;
    }

    pub fn record_lookup_started(&self, city_label: String, current_address: String) {
        let mut stats = self.inner.lock();
        stats.cities_processed.insert(city_label);
        stats.current_address = current_address;
    }

    pub fn record_success(&self, zip: ZipCode, message: String) {
        let mut stats = self.inner.lock();
        stats.successful_geocodes += 1;
        stats.zip_codes_found.insert(zip);
        stats.push_log(LogKind::Success, message);
    }

    pub fn record_failure(&self, message: String) {
        let mut stats = self.inner.lock();
        stats.failed_geocodes += 1;
        stats.push_log(LogKind::Failure, message);
    }

    pub fn record_error(&self, message: String) {
        self.inner.lock().push_log(LogKind::Error, message);
    }

    /// Counts one finished row and recomputes the floor percentage.
    pub fn record_row_processed(&self, total_rows: usize) {
        let mut stats = self.inner.lock();
        stats.total_processed += 1;
        let percent = if total_rows == 0 {
            100
        } else {
            (stats.total_processed.min(total_rows) * 100 / total_rows) as u8
        };
        stats.progress_percent = stats.progress_percent.max(percent);
    }

    pub fn mark_progress_complete(&self) {
        self.inner.lock().progress_percent = 100;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_detached_from_live_stats() {
        let stats = StatsHandle::new(10);
        stats.record_lookup_started("Springfield, IL".into(), "1 MAIN ST".into());
        stats.record_success(ZipCode::parse("62701").unwrap(), "ok".into());
        let before = stats.snapshot();

        stats.record_failure("missed".into());
        stats.record_api_call();

        assert_eq!(before.successful_geocodes, 1);
        assert_eq!(before.failed_geocodes, 0);
        assert_eq!(before.api_calls, 0);
        assert_eq!(before.cities_processed, vec!["Springfield, IL".to_string()]);
        assert_eq!(before.zip_codes_found, vec!["62701".to_string()]);
        assert_eq!(before.results_log.len(), 1);
        assert_eq!(stats.snapshot().results_log.len(), 2);
    }

    #[test]
    fn log_drops_oldest_entries_past_capacity() {
        let stats = StatsHandle::new(2);
        stats.record_failure("first".into());
        stats.record_failure("second".into());
        stats.record_error("third".into());

        let log = stats.snapshot().results_log;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message, "second");
        assert_eq!(log[1].kind, LogKind::Error);
        assert_eq!(stats.snapshot().failed_geocodes, 2);
    }

    #[test]
    fn progress_rounds_down() {
        let stats = StatsHandle::new(1);
        let mut seen = Vec::new();
        for _ in 0..3 {
            stats.record_row_processed(3);
            seen.push(stats.snapshot().progress_percent);
        }
        assert_eq!(seen, vec![33, 66, 100]);
    }

    #[test]
    fn completion_flag_follows_state() {
        let stats = StatsHandle::new(1);
        assert!(!stats.snapshot().processing_complete);
        stats.set_state(SessionState::Cancelled);
        assert!(!stats.snapshot().processing_complete);
        stats.set_state(SessionState::Completed);
        let snapshot = stats.snapshot();
        assert!(snapshot.processing_complete);
        assert_eq!(snapshot.state.as_str(), "completed");
        assert!(snapshot.state.is_terminal());
    }
}

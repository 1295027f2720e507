//! Advisory suggestion pipeline.
//!
//! Block text is sent to an out-of-process analyzer after a debounce, and the
//! analyzer's answer is surfaced as a suggestion the user must accept
//! explicitly. Every reply is matched against the latest request id for its
//! key ([`SingleFlight`]); anything older is dropped without touching state.
//!
//! - [`TidyPipeline`] - per-block text tidying with accept, dismiss and undo
//! - [`DetectionPipeline`] - per-section flashcard and pattern detection
//! - [`worker`] - analyzer wire format and transports
//! - [`RuleAnalyzer`] - built-in deterministic analyzer
//! - [`AdvisoryService`] - async actor wiring the pipelines to workers

mod deadlines;
mod detect;
pub mod rules;
pub mod service;
mod single_flight;
mod tidy;
pub mod worker;

pub use deadlines::Deadlines;
pub use detect::{DetectionPipeline, DetectionState};
pub use rules::RuleAnalyzer;
pub use service::{AdvisoryHandle, AdvisoryService, SharedStore};
pub use single_flight::{RequestId, SingleFlight};
pub use tidy::{TidyPipeline, TidyState};

use crate::core::BlockId;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;
use unicode_segmentation::UnicodeSegmentation;
use worker::AnalyzerRequest;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    pub debounce_ms: u64,
    pub timeout_ms: u64,
    /// Minimum grapheme count before a block is sent for tidying.
    pub min_chars: usize,
    /// Minimum grapheme count of a section before detection runs.
    pub detect_min_chars: usize,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 20_000,
            timeout_ms: 60_000,
            min_chars: 12,
            detect_min_chars: 40,
        }
    }
}

impl AdvisoryConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AdvisoryError {
    #[error("analyzer did not answer within {after_ms} ms")]
    Timeout { after_ms: u64 },
    #[error("analyzer error: {detail}")]
    Worker { detail: String },
    #[error("analyzer channel closed")]
    ChannelClosed,
    #[error("unexpected analyzer payload: {detail}")]
    UnexpectedPayload { detail: String },
}

impl AdvisoryError {
    /// Analyzer failures are never retried automatically, but a retry by the
    /// user may always succeed.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Byte range into the text that was sent for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDiff {
    pub range: TextRange,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub block: BlockId,
    pub request_id: RequestId,
    pub original: String,
    pub proposed: String,
    pub diffs: Vec<TextDiff>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionKind {
    Flashcard,
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub kind: DetectionKind,
    pub front: String,
    pub back: String,
    pub range: TextRange,
}

/// Lifecycle notifications for the surrounding UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AdvisoryEvent {
    SuggestionReady {
        suggestion: Suggestion,
    },
    SuggestionApplied {
        block: BlockId,
    },
    SuggestionUndone {
        block: BlockId,
    },
    SuggestionDismissed {
        block: BlockId,
    },
    SuggestionError {
        block: BlockId,
        error: AdvisoryError,
    },
    DetectionsReady {
        container: Option<BlockId>,
        detections: Vec<Detection>,
    },
    DetectionsDismissed {
        container: Option<BlockId>,
    },
    DetectionError {
        container: Option<BlockId>,
        error: AdvisoryError,
    },
    PersistenceError {
        block: BlockId,
        detail: String,
    },
}

/// Work produced by a pipeline poll.
#[derive(Debug, Default)]
pub struct Poll {
    pub requests: Vec<AnalyzerRequest>,
    pub events: Vec<AdvisoryEvent>,
    /// A request timed out and the analyzer channel should be recreated.
    pub restart_worker: bool,
}

pub(crate) fn grapheme_len(text: &str) -> usize {
    text.trim().graphemes(true).count()
}

/// Debounce timers, timeout guards and single-flight ids for one pipeline.
#[derive(Debug)]
pub(crate) struct Scheduler<K> {
    debounce: Deadlines<K>,
    timeouts: Deadlines<K>,
    flights: SingleFlight<K>,
    config: AdvisoryConfig,
}

impl<K: Copy + Eq + Hash + Ord> Scheduler<K> {
    pub(crate) fn new(config: AdvisoryConfig) -> Self {
        Self {
            debounce: Deadlines::new(),
            timeouts: Deadlines::new(),
            flights: SingleFlight::new(),
            config,
        }
    }

    pub(crate) fn config(&self) -> &AdvisoryConfig {
        &self.config
    }

    /// (Re)arms the debounce timer for `key`.
    pub(crate) fn schedule(&mut self, key: K, now: Instant) {
        self.debounce.arm(key, now + self.config.debounce());
    }

    pub(crate) fn is_scheduled(&self, key: &K) -> bool {
        self.debounce.contains(key)
    }

    /// Drops the timer and renders any outstanding request inert.
    pub(crate) fn unschedule(&mut self, key: &K) {
        self.debounce.cancel(key);
        self.abandon(key);
    }

    pub(crate) fn abandon(&mut self, key: &K) {
        self.timeouts.cancel(key);
        self.flights.cancel(key);
    }

    pub(crate) fn fire(&mut self, key: K, now: Instant) -> RequestId {
        self.debounce.cancel(&key);
        self.timeouts.arm(key, now + self.config.timeout());
        self.flights.issue(key)
    }

    /// Resolves a reply to its key, or `None` when it is stale.
    pub(crate) fn settle(&mut self, id: RequestId) -> Option<K> {
        let key = self.flights.settle(id)?;
        self.timeouts.cancel(&key);
        Some(key)
    }

    pub(crate) fn in_flight(&self) -> Vec<RequestId> {
        self.flights.in_flight()
    }

    /// Keys whose debounce fired, and requests whose guard expired.
    pub(crate) fn due(&mut self, now: Instant) -> (Vec<K>, Vec<(K, RequestId)>) {
        let timed_out = self
            .timeouts
            .due(now)
            .into_iter()
            .filter_map(|key| self.flights.cancel(&key).map(|id| (key, id)))
            .collect();
        (self.debounce.due(now), timed_out)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce.next_deadline(), self.timeouts.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

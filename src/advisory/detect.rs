use super::worker::{AnalysisKind, AnalyzerReply, AnalyzerRequest, ReplyOutcome};
use super::{AdvisoryConfig, AdvisoryError, AdvisoryEvent, Detection, Poll, RequestId, Scheduler};
use crate::core::BlockId;
use crate::export;
use crate::storage::BlockCollection;
use crate::store::BlockStore;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A section is keyed by its nearest lecture container; `None` is the
/// document root.
pub type SectionKey = Option<BlockId>;

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionState {
    Idle,
    Pending { request: RequestId, sent: String },
    Ready(Vec<Detection>),
    Error(AdvisoryError),
}

static IDLE: DetectionState = DetectionState::Idle;

/// Flashcard and pattern detection over whole sections.
///
/// Shares the tidy pipeline's debounce, single-flight and timeout handling.
/// Detections are additive, so there is no applied or undo state: accepting
/// one hands it back to the caller.
#[derive(Debug)]
pub struct DetectionPipeline {
    scheduler: Scheduler<SectionKey>,
    states: HashMap<SectionKey, DetectionState>,
}

impl DetectionPipeline {
    pub fn new(config: AdvisoryConfig) -> Self {
        Self {
            scheduler: Scheduler::new(config),
            states: HashMap::new(),
        }
    }

    pub fn state(&self, container: SectionKey) -> &DetectionState {
        self.states.get(&container).unwrap_or(&IDLE)
    }

    pub fn detections(&self, container: SectionKey) -> &[Detection] {
        match self.states.get(&container) {
            Some(DetectionState::Ready(detections)) => detections,
            _ => &[],
        }
    }

    pub fn is_scheduled(&self, container: SectionKey) -> bool {
        self.scheduler.is_scheduled(&container)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Records an edit of `block`, rescheduling detection for its section.
    pub fn on_edit<C: BlockCollection>(
        &mut self,
        block: BlockId,
        store: &BlockStore<C>,
        now: Instant,
    ) -> Vec<AdvisoryEvent> {
        if !store.contains(block) {
            return Vec::new();
        }
        let container = store.nearest_container(block);
        let mut events = Vec::new();
        match self.states.remove(&container) {
            Some(DetectionState::Ready(_)) => {
                events.push(AdvisoryEvent::DetectionsDismissed { container })
            }
            Some(DetectionState::Pending { .. }) => self.scheduler.abandon(&container),
            _ => {}
        }
        let text = export::section_outline(store, container);
        if super::grapheme_len(&text) >= self.scheduler.config().detect_min_chars {
            self.scheduler.schedule(container, now);
        } else {
            self.scheduler.unschedule(&container);
        }
        events
    }

    /// Forgets sections whose container was deleted.
    pub fn on_blocks_removed(&mut self, removed: &[BlockId]) {
        for id in removed {
            let key = Some(*id);
            self.scheduler.unschedule(&key);
            self.states.remove(&key);
        }
    }

    pub fn poll<C: BlockCollection>(&mut self, now: Instant, store: &BlockStore<C>) -> Poll {
        let mut poll = Poll::default();
        let (due, timed_out) = self.scheduler.due(now);

        for (container, request) in timed_out {
            let after_ms = self.scheduler.config().timeout_ms;
            warn!(?container, request = request.0, after_ms, "detection request timed out");
            let error = AdvisoryError::Timeout { after_ms };
            self.states
                .insert(container, DetectionState::Error(error.clone()));
            poll.events
                .push(AdvisoryEvent::DetectionError { container, error });
            poll.restart_worker = true;
        }

        for container in due {
            if let Some(request) = self.dispatch(container, now, store) {
                poll.requests.push(request);
            }
        }
        poll
    }

    fn dispatch<C: BlockCollection>(
        &mut self,
        container: SectionKey,
        now: Instant,
        store: &BlockStore<C>,
    ) -> Option<AnalyzerRequest> {
        if container.is_some_and(|id| !store.contains(id)) {
            self.states.remove(&container);
            return None;
        }
        let text = export::section_outline(store, container);
        if super::grapheme_len(&text) < self.scheduler.config().detect_min_chars {
            return None;
        }
        let request = self.scheduler.fire(container, now);
        self.states.insert(
            container,
            DetectionState::Pending {
                request,
                sent: text.clone(),
            },
        );
        Some(AnalyzerRequest {
            request_id: request,
            kind: AnalysisKind::Detect,
            text,
        })
    }

    pub fn on_reply<C: BlockCollection>(
        &mut self,
        reply: AnalyzerReply,
        store: &BlockStore<C>,
    ) -> Vec<AdvisoryEvent> {
        if matches!(reply.outcome, ReplyOutcome::Progress { .. }) {
            return Vec::new();
        }
        let Some(container) = self.scheduler.settle(reply.request_id) else {
            debug!(request = reply.request_id.0, "discarding stale detection reply");
            return Vec::new();
        };
        let Some(DetectionState::Pending { sent, .. }) = self.states.remove(&container) else {
            return Vec::new();
        };

        match reply.outcome {
            ReplyOutcome::Detected { detections } => {
                let still_there = container.is_none_or(|id| store.contains(id));
                if !still_there || export::section_outline(store, container) != sent {
                    debug!(?container, "section changed while detection was running");
                    return Vec::new();
                }
                if detections.is_empty() {
                    return Vec::new();
                }
                self.states
                    .insert(container, DetectionState::Ready(detections.clone()));
                vec![AdvisoryEvent::DetectionsReady {
                    container,
                    detections,
                }]
            }
            ReplyOutcome::Error { detail } => {
                self.fail(container, AdvisoryError::Worker { detail })
            }
            ReplyOutcome::Success { .. } | ReplyOutcome::Progress { .. } => self.fail(
                container,
                AdvisoryError::UnexpectedPayload {
                    detail: "proposed text in reply to a detection request".to_string(),
                },
            ),
        }
    }

    /// Fails every outstanding request except those in `keep`, e.g. after
    /// the worker that held them was torn down.
    pub fn fail_in_flight(
        &mut self,
        keep: &[RequestId],
        error: AdvisoryError,
    ) -> Vec<AdvisoryEvent> {
        self.scheduler
            .in_flight()
            .into_iter()
            .filter(|id| !keep.contains(id))
            .flat_map(|id| self.on_failure(id, error.clone()))
            .collect()
    }

    pub fn on_failure(&mut self, request: RequestId, error: AdvisoryError) -> Vec<AdvisoryEvent> {
        match self.scheduler.settle(request) {
            Some(container) => self.fail(container, error),
            None => Vec::new(),
        }
    }

    fn fail(&mut self, container: SectionKey, error: AdvisoryError) -> Vec<AdvisoryEvent> {
        self.states
            .insert(container, DetectionState::Error(error.clone()));
        vec![AdvisoryEvent::DetectionError { container, error }]
    }

    /// Takes detection `index` out of the ready list.
    pub fn accept(&mut self, container: SectionKey, index: usize) -> Option<Detection> {
        let Some(DetectionState::Ready(detections)) = self.states.get_mut(&container) else {
            return None;
        };
        if index >= detections.len() {
            return None;
        }
        let taken = detections.remove(index);
        if detections.is_empty() {
            self.states.remove(&container);
        }
        Some(taken)
    }

    pub fn dismiss(&mut self, container: SectionKey) -> Vec<AdvisoryEvent> {
        match self.states.get(&container) {
            Some(DetectionState::Ready(_) | DetectionState::Error(_)) => {
                self.states.remove(&container);
                vec![AdvisoryEvent::DetectionsDismissed { container }]
            }
            _ => Vec::new(),
        }
    }

    /// Discards current detections and scans the section again immediately.
    pub fn rerun<C: BlockCollection>(
        &mut self,
        container: SectionKey,
        now: Instant,
        store: &BlockStore<C>,
    ) -> Poll {
        let mut poll = Poll::default();
        if let Some(DetectionState::Ready(_)) = self.states.remove(&container) {
            poll.events
                .push(AdvisoryEvent::DetectionsDismissed { container });
        }
        self.scheduler.unschedule(&container);
        if let Some(request) = self.dispatch(container, now, store) {
            poll.requests.push(request);
        }
        poll
    }
}

use super::worker::{AnalysisKind, AnalyzerReply, AnalyzerRequest, ReplyOutcome};
use super::{AdvisoryConfig, AdvisoryError, AdvisoryEvent, Poll, RequestId, Scheduler, Suggestion};
use crate::core::{BlockId, BlockPatch};
use crate::storage::BlockCollection;
use crate::store::{BlockStore, StoreError};
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Per-block tidy state. Blocks without an entry are `Idle`.
#[derive(Debug, Clone, PartialEq)]
pub enum TidyState {
    Idle,
    Pending {
        request: RequestId,
        sent: String,
    },
    Ready(Suggestion),
    Error(AdvisoryError),
    Applied {
        original: String,
        applied: String,
    },
}

#[derive(Debug)]
pub struct TidyPipeline {
    scheduler: Scheduler<BlockId>,
    states: HashMap<BlockId, TidyState>,
}

static IDLE: TidyState = TidyState::Idle;

impl TidyPipeline {
    pub fn new(config: AdvisoryConfig) -> Self {
        Self {
            scheduler: Scheduler::new(config),
            states: HashMap::new(),
        }
    }

    pub fn state(&self, block: BlockId) -> &TidyState {
        self.states.get(&block).unwrap_or(&IDLE)
    }

    pub fn suggestion(&self, block: BlockId) -> Option<&Suggestion> {
        match self.states.get(&block) {
            Some(TidyState::Ready(suggestion)) => Some(suggestion),
            _ => None,
        }
    }

    /// A debounce timer is armed for `block`.
    pub fn is_scheduled(&self, block: BlockId) -> bool {
        self.scheduler.is_scheduled(&block)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Records a user edit of `block` whose content is now `content`.
    ///
    /// Any suggestion on screen is dismissed and any outstanding request is
    /// abandoned. The debounce timer is re-armed, or cancelled when the text is
    /// below the length threshold.
    pub fn on_edit(&mut self, block: BlockId, content: &str, now: Instant) -> Vec<AdvisoryEvent> {
        let mut events = Vec::new();
        match self.states.remove(&block) {
            Some(TidyState::Ready(_)) => events.push(AdvisoryEvent::SuggestionDismissed { block }),
            Some(TidyState::Pending { .. }) => self.scheduler.abandon(&block),
            _ => {}
        }
        if super::grapheme_len(content) >= self.scheduler.config().min_chars {
            self.scheduler.schedule(block, now);
        } else {
            self.scheduler.unschedule(&block);
        }
        events
    }

    pub fn on_blocks_removed(&mut self, removed: &[BlockId]) {
        for block in removed {
            self.scheduler.unschedule(block);
            self.states.remove(block);
        }
    }

    /// Fires due debounce timers and expired timeout guards.
    pub fn poll<C: BlockCollection>(&mut self, now: Instant, store: &BlockStore<C>) -> Poll {
        let mut poll = Poll::default();
        let (due, timed_out) = self.scheduler.due(now);

        for (block, request) in timed_out {
            let after_ms = self.scheduler.config().timeout_ms;
            warn!(%block, request = request.0, after_ms, "tidy request timed out");
            let error = AdvisoryError::Timeout { after_ms };
            self.states.insert(block, TidyState::Error(error.clone()));
            poll.events.push(AdvisoryEvent::SuggestionError { block, error });
            poll.restart_worker = true;
        }

        for block in due {
            if let Some(request) = self.dispatch(block, now, store) {
                poll.requests.push(request);
            }
        }
        poll
    }

    fn dispatch<C: BlockCollection>(
        &mut self,
        block: BlockId,
        now: Instant,
        store: &BlockStore<C>,
    ) -> Option<AnalyzerRequest> {
        let Some(content) = store.content(block) else {
            self.states.remove(&block);
            return None;
        };
        if super::grapheme_len(content) < self.scheduler.config().min_chars {
            return None;
        }
        let request = self.scheduler.fire(block, now);
        self.states.insert(
            block,
            TidyState::Pending {
                request,
                sent: content.to_string(),
            },
        );
        Some(AnalyzerRequest {
            request_id: request,
            kind: AnalysisKind::Tidy,
            text: content.to_string(),
        })
    }

    /// Applies an analyzer reply, re-validating against the current store.
    pub fn on_reply<C: BlockCollection>(
        &mut self,
        reply: AnalyzerReply,
        store: &BlockStore<C>,
    ) -> Vec<AdvisoryEvent> {
        if matches!(reply.outcome, ReplyOutcome::Progress { .. }) {
            return Vec::new();
        }
        let Some(block) = self.scheduler.settle(reply.request_id) else {
            debug!(request = reply.request_id.0, "discarding stale tidy reply");
            return Vec::new();
        };
        let Some(TidyState::Pending { sent, .. }) = self.states.remove(&block) else {
            return Vec::new();
        };

        match reply.outcome {
            ReplyOutcome::Success {
                proposed_text,
                diffs,
            } => {
                let current = store.content(block);
                if current != Some(sent.as_str()) || current == Some(proposed_text.as_str()) {
                    debug!(%block, "tidy reply no longer applies");
                    return Vec::new();
                }
                let suggestion = Suggestion {
                    block,
                    request_id: reply.request_id,
                    original: sent,
                    proposed: proposed_text,
                    diffs,
                };
                self.states
                    .insert(block, TidyState::Ready(suggestion.clone()));
                vec![AdvisoryEvent::SuggestionReady { suggestion }]
            }
            ReplyOutcome::Error { detail } => self.fail(block, AdvisoryError::Worker { detail }),
            ReplyOutcome::Detected { .. } | ReplyOutcome::Progress { .. } => self.fail(
                block,
                AdvisoryError::UnexpectedPayload {
                    detail: "detections in reply to a tidy request".to_string(),
                },
            ),
        }
    }

    /// Moves the request's block to the error state, e.g. after a failed send.
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
            Some(block) => self.fail(block, error),
            None => Vec::new(),
        }
    }

    fn fail(&mut self, block: BlockId, error: AdvisoryError) -> Vec<AdvisoryEvent> {
        self.states.insert(block, TidyState::Error(error.clone()));
        vec![AdvisoryEvent::SuggestionError { block, error }]
    }

    /// Writes the ready proposal into the block.
    ///
    /// If the block changed since the suggestion was produced, the suggestion
    /// is dismissed instead. A persistence error leaves the pipeline in
    /// `Applied`, matching the store's in-memory state.
    pub fn accept<C: BlockCollection>(
        &mut self,
        block: BlockId,
        store: &mut BlockStore<C>,
    ) -> Result<Vec<AdvisoryEvent>, StoreError> {
        let Some(TidyState::Ready(suggestion)) = self.states.get(&block) else {
            return Ok(Vec::new());
        };
        if store.content(block) != Some(suggestion.original.as_str()) {
            debug!(%block, "block changed under a ready suggestion");
            self.states.remove(&block);
            return Ok(vec![AdvisoryEvent::SuggestionDismissed { block }]);
        }
        let original = suggestion.original.clone();
        let applied = suggestion.proposed.clone();
        let patch = BlockPatch::content(applied.clone());
        self.states
            .insert(block, TidyState::Applied { original, applied });
        store.update(block, &patch)?;
        Ok(vec![AdvisoryEvent::SuggestionApplied { block }])
    }

    /// Restores the text replaced by [`accept`](Self::accept), if the block
    /// still holds the applied text.
    pub fn undo<C: BlockCollection>(
        &mut self,
        block: BlockId,
        store: &mut BlockStore<C>,
    ) -> Result<Vec<AdvisoryEvent>, StoreError> {
        let Some(TidyState::Applied { original, applied }) = self.states.remove(&block) else {
            return Ok(Vec::new());
        };
        if store.content(block) != Some(applied.as_str()) {
            return Ok(Vec::new());
        }
        store.update(block, &BlockPatch::content(original))?;
        Ok(vec![AdvisoryEvent::SuggestionUndone { block }])
    }

    /// Drops a ready suggestion or a shown error without touching content.
    pub fn dismiss(&mut self, block: BlockId) -> Vec<AdvisoryEvent> {
        match self.states.get(&block) {
            Some(TidyState::Ready(_) | TidyState::Error(_)) => {
                self.states.remove(&block);
                vec![AdvisoryEvent::SuggestionDismissed { block }]
            }
            _ => Vec::new(),
        }
    }

    /// Discards the current proposal and asks again immediately.
    pub fn rerun<C: BlockCollection>(
        &mut self,
        block: BlockId,
        now: Instant,
        store: &BlockStore<C>,
    ) -> Poll {
        let mut poll = Poll::default();
        if let Some(TidyState::Ready(_)) = self.states.remove(&block) {
            poll.events.push(AdvisoryEvent::SuggestionDismissed { block });
        }
        self.scheduler.unschedule(&block);
        if let Some(request) = self.dispatch(block, now, store) {
            poll.requests.push(request);
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Template;
    use std::time::Duration;

    fn setup(content: &str) -> (BlockStore, BlockId, TidyPipeline, Instant) {
        let mut store = BlockStore::in_memory();
        let block = store
            .create_with(None, None, &Template::default(), content)
            .unwrap()
            .created_id()
            .unwrap();
        (store, block, TidyPipeline::new(AdvisoryConfig::default()), Instant::now())
    }

    fn success(request: RequestId, text: &str) -> AnalyzerReply {
        AnalyzerReply {
            request_id: request,
            outcome: ReplyOutcome::Success {
                proposed_text: text.to_string(),
                diffs: Vec::new(),
            },
        }
    }

    #[test]
    fn test_short_text_is_not_scheduled() {
        let (_store, block, mut tidy, now) = setup("tiny");
        tidy.on_edit(block, "tiny", now);
        assert!(!tidy.is_scheduled(block));
        tidy.on_edit(block, "long enough to analyze", now);
        assert!(tidy.is_scheduled(block));
        tidy.on_edit(block, "tiny", now);
        assert!(!tidy.is_scheduled(block));
    }

    #[test]
    fn test_debounce_then_ready_then_accept_and_undo() {
        let text = "this  is a sentence .";
        let (mut store, block, mut tidy, now) = setup(text);
        tidy.on_edit(block, text, now);
        assert!(tidy.poll(now + Duration::from_secs(5), &store).requests.is_empty());

        let poll = tidy.poll(now + Duration::from_secs(20), &store);
        let [request] = poll.requests.as_slice() else {
            panic!("expected one request");
        };
        assert_eq!(request.text, text);

        let events = tidy.on_reply(success(request.request_id, "This is a sentence."), &store);
        assert!(matches!(events[0], AdvisoryEvent::SuggestionReady { .. }));

        tidy.accept(block, &mut store).unwrap();
        assert_eq!(store.content(block), Some("This is a sentence."));
        tidy.undo(block, &mut store).unwrap();
        assert_eq!(store.content(block), Some(text));
        assert_eq!(tidy.state(block), &TidyState::Idle);
    }

    #[test]
    fn test_drifted_content_discards_reply() {
        let text = "some words to be tidied";
        let (mut store, block, mut tidy, now) = setup(text);
        let poll = tidy.rerun(block, now, &store);
        let request = poll.requests[0].request_id;

        store
            .update(block, &BlockPatch::content("changed meanwhile"))
            .unwrap();
        assert!(tidy.on_reply(success(request, "Some words."), &store).is_empty());
        assert_eq!(tidy.state(block), &TidyState::Idle);
    }

    #[test]
    fn test_timeout_moves_to_error_and_requests_restart() {
        let text = "waiting on a slow analyzer";
        let (store, block, mut tidy, now) = setup(text);
        tidy.rerun(block, now, &store);
        let poll = tidy.poll(now + Duration::from_secs(61), &store);
        assert!(poll.restart_worker);
        assert!(matches!(
            tidy.state(block),
            TidyState::Error(AdvisoryError::Timeout { after_ms: 60_000 })
        ));
    }
}

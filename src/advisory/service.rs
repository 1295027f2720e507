//! Async actor that owns both pipelines and their worker channels.
//!
//! The service never blocks on the analyzer: commands, worker replies and the
//! next pipeline deadline are multiplexed in one `select!` loop. The store is
//! shared behind a mutex that is only held inside synchronous handlers.

use super::worker::{AnalyzerChannel, AnalyzerReply, AnalyzerRequest, SpawnWorker};
use super::{
    AdvisoryConfig, AdvisoryError, AdvisoryEvent, Detection, DetectionPipeline, Poll, RequestId,
    TidyPipeline,
};
use crate::core::BlockId;
use crate::storage::BlockCollection;
use crate::store::{BlockStore, StoreError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::warn;

pub type SharedStore<C> = Arc<Mutex<BlockStore<C>>>;

/// Store mutations never leave a half-applied tree, so a poisoned lock is
/// still usable.
fn lock<C>(store: &Mutex<BlockStore<C>>) -> MutexGuard<'_, BlockStore<C>> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
enum Command {
    Edited(BlockId),
    BlocksRemoved(Vec<BlockId>),
    Accept(BlockId),
    Dismiss(BlockId),
    Undo(BlockId),
    Rerun(BlockId),
    AcceptDetection {
        container: Option<BlockId>,
        index: usize,
        reply: oneshot::Sender<Option<Detection>>,
    },
    DismissDetections(Option<BlockId>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Tidy,
    Detect,
}

/// Cheap, cloneable front end to a running [`AdvisoryService`].
#[derive(Debug, Clone)]
pub struct AdvisoryHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl AdvisoryHandle {
    fn send(&self, command: Command) -> Result<(), AdvisoryError> {
        self.commands
            .send(command)
            .map_err(|_| AdvisoryError::ChannelClosed)
    }

    /// Reports a user edit. The service reads the new content from the store.
    pub fn edited(&self, block: BlockId) -> Result<(), AdvisoryError> {
        self.send(Command::Edited(block))
    }

    /// Cancels timers and outstanding requests for deleted blocks.
    pub fn blocks_removed(&self, removed: Vec<BlockId>) -> Result<(), AdvisoryError> {
        self.send(Command::BlocksRemoved(removed))
    }

    pub fn accept(&self, block: BlockId) -> Result<(), AdvisoryError> {
        self.send(Command::Accept(block))
    }

    pub fn dismiss(&self, block: BlockId) -> Result<(), AdvisoryError> {
        self.send(Command::Dismiss(block))
    }

    pub fn undo(&self, block: BlockId) -> Result<(), AdvisoryError> {
        self.send(Command::Undo(block))
    }

    pub fn rerun(&self, block: BlockId) -> Result<(), AdvisoryError> {
        self.send(Command::Rerun(block))
    }

    pub async fn accept_detection(
        &self,
        container: Option<BlockId>,
        index: usize,
    ) -> Result<Option<Detection>, AdvisoryError> {
        let (reply, receive) = oneshot::channel();
        self.send(Command::AcceptDetection {
            container,
            index,
            reply,
        })?;
        receive.await.map_err(|_| AdvisoryError::ChannelClosed)
    }

    pub fn dismiss_detections(&self, container: Option<BlockId>) -> Result<(), AdvisoryError> {
        self.send(Command::DismissDetections(container))
    }

    pub fn shutdown(&self) -> Result<(), AdvisoryError> {
        self.send(Command::Shutdown)
    }
}

#[derive(Debug)]
pub struct AdvisoryService<C> {
    store: SharedStore<C>,
    tidy: TidyPipeline,
    detect: DetectionPipeline,
    tidy_worker: AnalyzerChannel,
    detect_worker: AnalyzerChannel,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<AdvisoryEvent>,
}

impl<C> AdvisoryService<C>
where
    C: BlockCollection + Send + 'static,
{
    /// Builds the service with one worker per pipeline, both from `spawn`.
    pub fn new(
        store: SharedStore<C>,
        config: AdvisoryConfig,
        spawn: SpawnWorker,
    ) -> Result<(Self, AdvisoryHandle, mpsc::UnboundedReceiver<AdvisoryEvent>), AdvisoryError>
    {
        let tidy_worker = AnalyzerChannel::open(Arc::clone(&spawn))?;
        let detect_worker = AnalyzerChannel::open(spawn)?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let service = Self {
            store,
            tidy: TidyPipeline::new(config.clone()),
            detect: DetectionPipeline::new(config),
            tidy_worker,
            detect_worker,
            commands: command_rx,
            events: event_tx,
        };
        let handle = AdvisoryHandle {
            commands: command_tx,
        };
        Ok((service, handle, event_rx))
    }

    /// [`new`](Self::new) followed by `tokio::spawn(service.run())`.
    pub fn spawn(
        store: SharedStore<C>,
        config: AdvisoryConfig,
        spawn: SpawnWorker,
    ) -> Result<
        (
            AdvisoryHandle,
            mpsc::UnboundedReceiver<AdvisoryEvent>,
            JoinHandle<()>,
        ),
        AdvisoryError,
    > {
        let (service, handle, events) = Self::new(store, config, spawn)?;
        let task = tokio::spawn(service.run());
        Ok((handle, events, task))
    }

    pub async fn run(mut self) {
        loop {
            let deadline = match (self.tidy.next_deadline(), self.detect.next_deadline()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle(command),
                },
                reply = self.tidy_worker.recv() => self.on_reply(Lane::Tidy, reply),
                reply = self.detect_worker.recv() => self.on_reply(Lane::Detect, reply),
                () = timer => self.poll(Instant::now()),
            }
        }
    }

    fn emit(&self, events: Vec<AdvisoryEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }

    fn handle(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Edited(block) => {
                let shared = Arc::clone(&self.store);
                let store = lock(&shared);
                let mut events = match store.content(block) {
                    Some(content) => self.tidy.on_edit(block, content, now),
                    None => {
                        self.tidy.on_blocks_removed(&[block]);
                        Vec::new()
                    }
                };
                events.extend(self.detect.on_edit(block, &store, now));
                drop(store);
                self.emit(events);
            }
            Command::BlocksRemoved(removed) => {
                self.tidy.on_blocks_removed(&removed);
                self.detect.on_blocks_removed(&removed);
            }
            Command::Accept(block) => {
                let shared = Arc::clone(&self.store);
                let mut store = lock(&shared);
                let result = self.tidy.accept(block, &mut store);
                drop(store);
                self.finish_write(block, result);
            }
            Command::Undo(block) => {
                let shared = Arc::clone(&self.store);
                let mut store = lock(&shared);
                let result = self.tidy.undo(block, &mut store);
                drop(store);
                self.finish_write(block, result);
            }
            Command::Dismiss(block) => {
                let events = self.tidy.dismiss(block);
                self.emit(events);
            }
            Command::Rerun(block) => {
                let poll = {
                    let shared = Arc::clone(&self.store);
                    let store = lock(&shared);
                    self.tidy.rerun(block, now, &store)
                };
                self.dispatch(Lane::Tidy, poll);
            }
            Command::AcceptDetection {
                container,
                index,
                reply,
            } => {
                let _ = reply.send(self.detect.accept(container, index));
            }
            Command::DismissDetections(container) => {
                let events = self.detect.dismiss(container);
                self.emit(events);
            }
            Command::Shutdown => {}
        }
    }

    fn finish_write(&self, block: BlockId, result: Result<Vec<AdvisoryEvent>, StoreError>) {
        match result {
            Ok(events) => self.emit(events),
            Err(err) => {
                warn!(%block, error = %err, "suggestion write was not persisted");
                self.emit(vec![AdvisoryEvent::PersistenceError {
                    block,
                    detail: err.to_string(),
                }]);
            }
        }
    }

    fn on_reply(&mut self, lane: Lane, reply: Option<AnalyzerReply>) {
        let Some(reply) = reply else {
            warn!(?lane, "analyzer worker went away, restarting");
            self.restart_lane(lane, &[]);
            return;
        };
        let events = {
            let shared = Arc::clone(&self.store);
            let store = lock(&shared);
            match lane {
                Lane::Tidy => self.tidy.on_reply(reply, &store),
                Lane::Detect => self.detect.on_reply(reply, &store),
            }
        };
        self.emit(events);
    }

    fn poll(&mut self, now: Instant) {
        let (tidy, detect) = {
            let shared = Arc::clone(&self.store);
            let store = lock(&shared);
            (self.tidy.poll(now, &store), self.detect.poll(now, &store))
        };
        self.dispatch(Lane::Tidy, tidy);
        self.dispatch(Lane::Detect, detect);
    }

    fn channel(&mut self, lane: Lane) -> &mut AnalyzerChannel {
        match lane {
            Lane::Tidy => &mut self.tidy_worker,
            Lane::Detect => &mut self.detect_worker,
        }
    }

    fn dispatch(&mut self, lane: Lane, poll: Poll) {
        self.emit(poll.events);
        let batch: Vec<RequestId> = poll.requests.iter().map(|r| r.request_id).collect();
        if poll.restart_worker {
            warn!(?lane, "recreating analyzer worker after a timeout");
            self.restart_lane(lane, &batch);
        }
        for (index, request) in poll.requests.into_iter().enumerate() {
            let id = request.request_id;
            if let Err(error) = self.send_with_retry(lane, request, &batch[index..]) {
                let events = match lane {
                    Lane::Tidy => self.tidy.on_failure(id, error),
                    Lane::Detect => self.detect.on_failure(id, error),
                };
                self.emit(events);
            }
        }
    }

    /// A dead channel gets one restart before the request is failed. `keep`
    /// names the requests still waiting to be sent on the new worker.
    fn send_with_retry(
        &mut self,
        lane: Lane,
        request: AnalyzerRequest,
        keep: &[RequestId],
    ) -> Result<(), AdvisoryError> {
        if self.channel(lane).send(request.clone()).is_ok() {
            return Ok(());
        }
        self.restart_lane(lane, keep);
        self.channel(lane).send(request)
    }

    /// Recreates the lane's worker. Whatever the old worker still held is
    /// lost with it, so those requests fail now rather than by timeout.
    fn restart_lane(&mut self, lane: Lane, keep: &[RequestId]) {
        if self.channel(lane).restart().is_err() {
            warn!(?lane, "analyzer lane has no worker");
        }
        let events = match lane {
            Lane::Tidy => self.tidy.fail_in_flight(keep, AdvisoryError::ChannelClosed),
            Lane::Detect => self.detect.fail_in_flight(keep, AdvisoryError::ChannelClosed),
        };
        self.emit(events);
    }
}

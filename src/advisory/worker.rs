//! Analyzer wire format and worker transports.
//!
//! Requests and replies are JSON objects; over a process boundary they travel
//! one per line. A reply carries exactly one `status`: `success`, `detected`,
//! `error`, or an out-of-band `progress` notification that the pipelines never
//! see.

use super::{AdvisoryError, Detection, RequestId, TextDiff};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisKind {
    Tidy,
    Detect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerRequest {
    pub request_id: RequestId,
    pub kind: AnalysisKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerReply {
    pub request_id: RequestId,
    #[serde(flatten)]
    pub outcome: ReplyOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ReplyOutcome {
    Success {
        #[serde(rename = "proposedText")]
        proposed_text: String,
        #[serde(default)]
        diffs: Vec<TextDiff>,
    },
    Detected {
        detections: Vec<Detection>,
    },
    Error {
        detail: String,
    },
    Progress {
        #[serde(default)]
        detail: Option<String>,
    },
}

/// Synchronous analyzer run on the blocking pool by [`in_process`].
pub trait Analyze: Send + Sync + 'static {
    fn analyze(&self, request: &AnalyzerRequest) -> ReplyOutcome;
}

/// Both ends of a live worker plus the task driving it.
#[derive(Debug)]
pub struct WorkerEnds {
    pub requests: mpsc::UnboundedSender<AnalyzerRequest>,
    pub replies: mpsc::UnboundedReceiver<AnalyzerReply>,
    pub task: JoinHandle<()>,
}

/// Factory for fresh workers. Called again on every restart.
pub type SpawnWorker = Arc<dyn Fn() -> Result<WorkerEnds, AdvisoryError> + Send + Sync>;

/// Restartable connection to an analyzer worker.
pub struct AnalyzerChannel {
    spawn: SpawnWorker,
    ends: Option<WorkerEnds>,
    restarts: u32,
}

impl std::fmt::Debug for AnalyzerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerChannel")
            .field("connected", &self.ends.is_some())
            .field("restarts", &self.restarts)
            .finish()
    }
}

impl AnalyzerChannel {
    pub fn open(spawn: SpawnWorker) -> Result<Self, AdvisoryError> {
        let ends = spawn()?;
        Ok(Self {
            spawn,
            ends: Some(ends),
            restarts: 0,
        })
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn send(&mut self, request: AnalyzerRequest) -> Result<(), AdvisoryError> {
        let ends = self.ends.as_ref().ok_or(AdvisoryError::ChannelClosed)?;
        ends.requests
            .send(request)
            .map_err(|_| AdvisoryError::ChannelClosed)
    }

    /// Next non-progress reply. `None` once the worker has gone away; pends
    /// forever while no worker is attached.
    pub async fn recv(&mut self) -> Option<AnalyzerReply> {
        let Some(ends) = self.ends.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            let reply = ends.replies.recv().await?;
            if let ReplyOutcome::Progress { detail } = &reply.outcome {
                debug!(request = reply.request_id.0, ?detail, "analyzer progress");
                continue;
            }
            return Some(reply);
        }
    }

    /// Tears the current worker down and starts a new one.
    pub fn restart(&mut self) -> Result<(), AdvisoryError> {
        if let Some(ends) = self.ends.take() {
            ends.task.abort();
        }
        self.restarts += 1;
        match (self.spawn)() {
            Ok(ends) => {
                self.ends = Some(ends);
                Ok(())
            }
            Err(err) => {
                warn!(%err, "analyzer worker failed to restart");
                Err(err)
            }
        }
    }
}

impl Drop for AnalyzerChannel {
    fn drop(&mut self) {
        if let Some(ends) = self.ends.take() {
            ends.task.abort();
        }
    }
}

/// Runs `analyzer` inside this process, one request at a time.
pub fn in_process(analyzer: impl Analyze) -> SpawnWorker {
    let analyzer = Arc::new(analyzer);
    Arc::new(move || {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<AnalyzerRequest>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let analyzer = Arc::clone(&analyzer);
        let task = tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let request_id = request.request_id;
                let analyzer = Arc::clone(&analyzer);
                let outcome =
                    match tokio::task::spawn_blocking(move || analyzer.analyze(&request)).await {
                        Ok(outcome) => outcome,
                        Err(err) => ReplyOutcome::Error {
                            detail: err.to_string(),
                        },
                    };
                if reply_tx
                    .send(AnalyzerReply {
                        request_id,
                        outcome,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });
        Ok(WorkerEnds {
            requests: request_tx,
            replies: reply_rx,
            task,
        })
    })
}

/// Spawns `argv` as a child process speaking JSON lines on stdin/stdout.
/// The child is killed when its worker is torn down.
pub fn external(argv: Vec<String>) -> SpawnWorker {
    Arc::new(move || {
        let (program, args) = argv.split_first().ok_or_else(|| AdvisoryError::Worker {
            detail: "empty analyzer command".to_string(),
        })?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AdvisoryError::Worker {
                detail: format!("failed to start {program}: {err}"),
            })?;
        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(AdvisoryError::ChannelClosed);
        };

        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<AnalyzerRequest>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let _child = child;
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    request = request_rx.recv() => {
                        let Some(request) = request else { break };
                        let Ok(mut line) = serde_json::to_string(&request) else { continue };
                        line.push('\n');
                        if stdin.write_all(line.as_bytes()).await.is_err()
                            || stdin.flush().await.is_err()
                        {
                            break;
                        }
                    }
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        match serde_json::from_str::<AnalyzerReply>(&line) {
                            Ok(reply) => {
                                if reply_tx.send(reply).is_err() {
                                    break;
                                }
                            }
                            Err(err) => debug!(%err, "ignoring malformed analyzer output"),
                        }
                    }
                }
            }
        });
        Ok(WorkerEnds {
            requests: request_tx,
            replies: reply_rx,
            task,
        })
    })
}

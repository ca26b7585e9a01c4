//! Start-then-poll lifecycle for one plot-generation task at a time.
//!
//! A [`TaskPoller`] owns its [`TaskState`]. Callers drive it with
//! [`TaskPoller::start_generation`] and [`TaskPoller::cancel`] and observe it
//! through [`TaskPoller::subscribe`] or [`TaskPoller::wait_until_idle`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::host::Host;
use crate::images::{ImageRef, materialize_all};
use crate::transport::{RequestDescriptor, Requester};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);
pub const DEFAULT_STATUS_PATH: &str = "/api/plots/status/";
/// Shortest accepted poll interval; `tokio::time::interval` rejects zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub const TASK_CREATION_FAILED: &str = "task creation failed";
pub const NO_IMAGES_RETURNED: &str = "no images returned";
pub const GENERATION_FAILED: &str = "generation failed";

#[derive(Clone, Debug)]
pub struct PollerOptions {
    /// Delay between status polls.
    pub interval: Duration,
    /// Prefix the task id is appended to.
    pub status_path: String,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            status_path: DEFAULT_STATUS_PATH.to_string(),
        }
    }
}

/// How the most recent task ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Completed { images: Vec<ImageRef> },
    Failed { message: String },
    Cancelled,
}

/// Observable generation state.
///
/// `polling` is true iff a poll schedule is active; `generating` is true from
/// the start request until a terminal state, an early abort or a cancel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TaskState {
    pub generating: bool,
    pub task_id: String,
    pub images: Vec<ImageRef>,
    pub polling: bool,
    pub outcome: Option<Outcome>,
}

/// Result of a [`TaskPoller::start_generation`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// A task was already in flight; nothing was sent.
    AlreadyRunning,
    /// The start request was rejected by the transport.
    Rejected,
    /// The service answered without a task id.
    MissingTaskId,
    /// `cancel` ran while the start request was outstanding.
    Cancelled,
    Started { task_id: String },
}

/// One status response, classified.
#[derive(Debug, PartialEq, Eq)]
pub enum PollStatus {
    /// Any non-terminal status, e.g. `pending` or `running`.
    InProgress(String),
    Completed(Vec<String>),
    Failed(String),
    /// No usable `status` field.
    Unrecognized,
}

fn string_list(body: &Value, field: &str) -> Vec<String> {
    body.get(field)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Classify a status response. Inline `images_data` wins over `images` when
/// it is non-empty.
pub fn parse_status(body: &Value) -> PollStatus {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());

    match status {
        Some("completed") => {
            let inline = string_list(body, "images_data");
            if inline.is_empty() {
                PollStatus::Completed(string_list(body, "images"))
            } else {
                PollStatus::Completed(inline)
            }
        }
        Some("failed") => {
            let msg = body
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or(GENERATION_FAILED);
            PollStatus::Failed(msg.to_string())
        }
        Some(other) => PollStatus::InProgress(other.to_string()),
        None => PollStatus::Unrecognized,
    }
}

/// Pull the task id out of a start response. Numeric ids are accepted.
fn task_id_of(body: &Value) -> Option<String> {
    match body.get("task_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

struct Schedule {
    /// Bumped by every start and every cancel; results from an older epoch
    /// are discarded.
    epoch: u64,
    token: Option<CancellationToken>,
}

struct Shared {
    requester: Requester,
    host: Host,
    options: PollerOptions,
    state: watch::Sender<TaskState>,
    schedule: Mutex<Schedule>,
}

impl Shared {
    fn lock_schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, message: &str) {
        self.requester.notifier().notify(message);
    }

    /// Return to idle after a failed start, unless a cancel got there first.
    fn abort_start(&self, epoch: u64, message: String) -> bool {
        let schedule = self.lock_schedule();
        if schedule.epoch != epoch {
            return false;
        }
        self.state.send_modify(|s| {
            s.generating = false;
            s.task_id.clear();
            s.outcome = Some(Outcome::Failed { message });
        });
        true
    }

    fn is_current(&self, epoch: u64, task_id: &str) -> bool {
        let schedule = self.lock_schedule();
        schedule.epoch == epoch && self.state.borrow().task_id == task_id
    }

    /// Apply a terminal outcome if it still belongs to the current task.
    fn finish(&self, epoch: u64, task_id: &str, outcome: Outcome) -> bool {
        let mut schedule = self.lock_schedule();
        let current = schedule.epoch == epoch && self.state.borrow().task_id == task_id;
        if !current {
            tracing::debug!(task_id, "discarding stale poll result");
            return false;
        }
        if let Some(token) = schedule.token.take() {
            token.cancel();
        }

        let notice = match &outcome {
            Outcome::Completed { images } if images.is_empty() => Some(NO_IMAGES_RETURNED.to_string()),
            Outcome::Failed { message } => Some(message.clone()),
            _ => None,
        };

        self.state.send_modify(|s| {
            s.generating = false;
            s.polling = false;
            s.task_id.clear();
            if let Outcome::Completed { images } = &outcome {
                s.images = images.clone();
            }
            s.outcome = Some(outcome);
        });
        drop(schedule);

        if let Some(message) = notice {
            self.notify(&message);
        }
        true
    }

    fn cancel(&self) {
        let mut schedule = self.lock_schedule();
        let had_schedule = match schedule.token.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        if !had_schedule && !self.state.borrow().generating {
            return;
        }
        schedule.epoch += 1;
        self.state.send_modify(|s| {
            s.generating = false;
            s.polling = false;
            s.task_id.clear();
            s.outcome = Some(Outcome::Cancelled);
        });
        tracing::debug!(epoch = schedule.epoch, "generation cancelled");
    }

    /// Convert inline images to host files when running in the mini-program
    /// container. Any failure keeps the inline list.
    async fn prepare_images(&self, raw: Vec<String>) -> Vec<ImageRef> {
        let inline = raw.first().is_some_and(|first| first.starts_with("data:"));
        if let Some(materializer) = self.host.materializer().filter(|_| inline) {
            match materialize_all(&*materializer, &raw).await {
                Ok(files) => return files,
                Err(e) => {
                    tracing::warn!("image conversion failed, keeping inline data: {e}");
                }
            }
        }
        raw.into_iter().map(ImageRef::Inline).collect()
    }
}

/// Remove files written for a result that arrived too late to be used.
async fn discard_files(images: &[ImageRef]) {
    let files = images.iter().filter_map(|image| match image {
        ImageRef::File(handle) => Some(handle.path()),
        ImageRef::Inline(_) => None,
    });
    for path in files {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), "failed to remove stale image: {e}");
        }
    }
}

async fn poll_loop(shared: Arc<Shared>, epoch: u64, task_id: String, token: CancellationToken) {
    let period = shared.options.interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    // Ticks never overlap: a slow status call pushes the next tick back.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let url = format!("{}{}", shared.options.status_path, task_id);
    let mut attempt: u64 = 0;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        attempt += 1;

        let response = tokio::select! {
            _ = token.cancelled() => break,
            r = shared.requester.send(RequestDescriptor::get(url.clone())) => r,
        };

        let body = match response {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(task_id, attempt, "status poll failed: {e}");
                continue;
            }
        };

        match parse_status(&body) {
            PollStatus::InProgress(status) => {
                tracing::debug!(task_id, attempt, status, "task still in progress");
            }
            PollStatus::Unrecognized => {
                tracing::debug!(task_id, attempt, "status response without status field");
            }
            PollStatus::Completed(raw) => {
                if !shared.is_current(epoch, &task_id) {
                    tracing::debug!(task_id, "discarding stale poll result");
                    break;
                }
                let images = shared.prepare_images(raw).await;
                let count = images.len();
                if shared.finish(epoch, &task_id, Outcome::Completed { images: images.clone() }) {
                    tracing::info!(task_id, attempt, images = count, "generation completed");
                } else {
                    discard_files(&images).await;
                }
                break;
            }
            PollStatus::Failed(message) => {
                if shared.finish(epoch, &task_id, Outcome::Failed { message: message.clone() }) {
                    tracing::info!(task_id, attempt, reason = message, "generation failed");
                }
                break;
            }
        }
    }
}

/// Cancels any live schedule once the last [`TaskPoller`] handle is gone.
struct CancelOnDrop(Arc<Shared>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Drives one generation task at a time. Cheap to clone; all clones share
/// the same state.
#[derive(Clone)]
pub struct TaskPoller {
    shared: Arc<Shared>,
    _guard: Arc<CancelOnDrop>,
}

impl TaskPoller {
    pub fn new(requester: Requester, host: Host) -> Self {
        Self::with_options(requester, host, PollerOptions::default())
    }

    pub fn with_options(requester: Requester, host: Host, mut options: PollerOptions) -> Self {
        if options.interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                interval_ms = options.interval.as_millis() as u64,
                "poll interval below minimum, using 1ms"
            );
            options.interval = MIN_POLL_INTERVAL;
        }
        let (state, _) = watch::channel(TaskState::default());
        let shared = Arc::new(Shared {
            requester,
            host,
            options,
            state,
            schedule: Mutex::new(Schedule {
                epoch: 0,
                token: None,
            }),
        });
        Self {
            _guard: Arc::new(CancelOnDrop(shared.clone())),
            shared,
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> TaskState {
        self.shared.state.borrow().clone()
    }

    pub fn is_generating(&self) -> bool {
        self.shared.state.borrow().generating
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.shared.state.subscribe()
    }

    /// Resolves once no task is generating, with the state at that moment.
    pub async fn wait_until_idle(&self) -> TaskState {
        let mut rx = self.shared.state.subscribe();
        rx.wait_for(|s| !s.generating)
            .await
            .map(|state| state.clone())
            .unwrap_or_else(|_| self.state())
    }

    /// Start a task and schedule status polling for it.
    ///
    /// A second call while a task is in flight is a no-op.
    pub async fn start_generation(&self, start_url: &str, payload: Value) -> StartOutcome {
        let shared = &self.shared;

        let epoch = {
            let mut schedule = shared.lock_schedule();
            if shared.state.borrow().generating {
                tracing::debug!(start_url, "generation already in flight, ignoring start");
                return StartOutcome::AlreadyRunning;
            }
            schedule.epoch += 1;
            shared.state.send_modify(|s| {
                s.generating = true;
                s.task_id.clear();
                s.images.clear();
                s.outcome = None;
            });
            schedule.epoch
        };

        let response = match shared
            .requester
            .send(RequestDescriptor::post(start_url, payload))
            .await
        {
            Ok(body) => body,
            Err(e) => {
                // The requester has already raised a notice.
                return if shared.abort_start(epoch, e.user_message()) {
                    StartOutcome::Rejected
                } else {
                    StartOutcome::Cancelled
                };
            }
        };

        let Some(task_id) = task_id_of(&response) else {
            if !shared.abort_start(epoch, TASK_CREATION_FAILED.to_string()) {
                return StartOutcome::Cancelled;
            }
            tracing::warn!(start_url, "start response carried no task_id");
            shared.notify(TASK_CREATION_FAILED);
            return StartOutcome::MissingTaskId;
        };

        let token = {
            let mut schedule = shared.lock_schedule();
            if schedule.epoch != epoch {
                tracing::debug!(task_id, "cancelled before polling began");
                return StartOutcome::Cancelled;
            }
            if let Some(previous) = schedule.token.take() {
                previous.cancel();
            }
            let token = CancellationToken::new();
            schedule.token = Some(token.clone());
            shared.state.send_modify(|s| {
                s.task_id = task_id.clone();
                s.polling = true;
            });
            token
        };

        tracing::info!(
            start_url,
            task_id,
            interval_ms = shared.options.interval.as_millis() as u64,
            "generation task launched"
        );
        tokio::spawn(poll_loop(shared.clone(), epoch, task_id.clone(), token));

        StartOutcome::Started { task_id }
    }

    /// Stop polling and return to idle. Safe to call any number of times; an
    /// in-flight status request is dropped and its result ignored.
    pub fn cancel(&self) {
        self.shared.cancel();
    }
}

impl std::fmt::Debug for TaskPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPoller")
            .field("state", &*self.shared.state.borrow())
            .field("options", &self.shared.options)
            .finish()
    }
}

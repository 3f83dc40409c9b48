//! Per-model Request Queue (spec §4.K): bounded FIFO ahead of a fixed
//! per-model concurrency limit, with cooperative cancellation.
//!
//! Wakeups use `tokio::sync::Notify` rather than polling (REDESIGN FLAG
//! #2): a worker blocks on `notify_slot` for a free concurrency slot and
//! is woken exactly when one frees up; a caller's `wait_for_completion`
//! blocks on the request's own `Notify` rather than re-polling status.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gwy_domain::error::{Error, ErrorDetail};
use gwy_domain::generate::GenerateOutput;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

pub type ExecutorFuture = Pin<Box<dyn Future<Output = gwy_domain::error::Result<GenerateOutput>> + Send>>;
pub type Executor = Box<dyn FnOnce() -> ExecutorFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

enum InternalStatus {
    Queued,
    Running,
    Completed(GenerateOutput),
    Failed { code: &'static str, message: String },
    Cancelled,
}

pub struct RequestStatusView {
    pub request_id: String,
    pub model_id: String,
    pub status: RequestStatus,
    pub queue_position: Option<usize>,
    pub output: Option<GenerateOutput>,
    pub error: Option<ErrorDetail>,
}

struct RequestState {
    request_id: String,
    model_id: String,
    created_at: DateTime<Utc>,
    status: Mutex<InternalStatus>,
    executor: Mutex<Option<Executor>>,
    cancelled: AtomicBool,
    notify: Notify,
}

struct ModelQueueState {
    fifo: VecDeque<Arc<RequestState>>,
    worker_running: bool,
}

struct ModelQueue {
    state: Mutex<ModelQueueState>,
    active: Mutex<HashSet<String>>,
    notify_slot: Notify,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueInfo {
    pub queue_depth: usize,
    pub active_count: usize,
    pub queued_request_ids: Vec<String>,
    pub active_request_ids: Vec<String>,
}

pub struct RequestQueue {
    model_queues: Mutex<HashMap<String, Arc<ModelQueue>>>,
    requests: Mutex<HashMap<String, Arc<RequestState>>>,
    max_queue_depth: usize,
    max_concurrent_per_model: usize,
    shutting_down: Arc<AtomicBool>,
}

fn view(state: &Arc<RequestState>, position: Option<usize>) -> RequestStatusView {
    let status = state.status.lock();
    let (status_kind, output, error) = match &*status {
        InternalStatus::Queued => (RequestStatus::Queued, None, None),
        InternalStatus::Running => (RequestStatus::Running, None, None),
        InternalStatus::Completed(out) => (RequestStatus::Completed, Some(out.clone()), None),
        InternalStatus::Failed { code, message } => (
            RequestStatus::Failed,
            None,
            Some(ErrorDetail { code, message: message.clone(), details: None }),
        ),
        InternalStatus::Cancelled => (RequestStatus::Cancelled, None, None),
    };
    RequestStatusView {
        request_id: state.request_id.clone(),
        model_id: state.model_id.clone(),
        status: status_kind,
        queue_position: if matches!(status_kind, RequestStatus::Queued) { position } else { None },
        output,
        error,
    }
}

impl RequestQueue {
    pub fn new(max_queue_depth: usize, max_concurrent_per_model: usize) -> Arc<Self> {
        Arc::new(Self {
            model_queues: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            max_queue_depth: max_queue_depth.max(1),
            max_concurrent_per_model: max_concurrent_per_model.max(1),
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    fn get_or_create_model_queue(&self, model_id: &str) -> Arc<ModelQueue> {
        let mut queues = self.model_queues.lock();
        queues
            .entry(model_id.to_string())
            .or_insert_with(|| {
                Arc::new(ModelQueue {
                    state: Mutex::new(ModelQueueState { fifo: VecDeque::new(), worker_running: false }),
                    active: Mutex::new(HashSet::new()),
                    notify_slot: Notify::new(),
                })
            })
            .clone()
    }

    fn recompute_positions(fifo: &VecDeque<Arc<RequestState>>) {
        // Positions are derived on read from FIFO order; nothing to store.
        let _ = fifo;
    }

    /// Admits a request onto `model_id`'s FIFO, or immediately marks it
    /// `Failed`/`queue_full` if the queue is at capacity. Returns the
    /// request id the caller polls/cancels with.
    pub fn enqueue(self: &Arc<Self>, model_id: &str, executor: Executor) -> String {
        let request_id = Uuid::new_v4().to_string();
        let state = Arc::new(RequestState {
            request_id: request_id.clone(),
            model_id: model_id.to_string(),
            created_at: Utc::now(),
            status: Mutex::new(InternalStatus::Queued),
            executor: Mutex::new(Some(executor)),
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        });
        self.requests.lock().insert(request_id.clone(), state.clone());

        let mq = self.get_or_create_model_queue(model_id);
        let need_spawn = {
            let mut qs = mq.state.lock();
            if qs.fifo.len() >= self.max_queue_depth {
                drop(qs);
                *state.status.lock() = InternalStatus::Failed {
                    code: Error::QueueFull(model_id.to_string()).code(),
                    message: format!("queue for model '{model_id}' is full ({} pending)", self.max_queue_depth),
                };
                state.notify.notify_waiters();
                return request_id;
            }
            qs.fifo.push_back(state);
            Self::recompute_positions(&qs.fifo);
            if !qs.worker_running {
                qs.worker_running = true;
                true
            } else {
                false
            }
        };

        if need_spawn {
            let this = self.clone();
            let model_id = model_id.to_string();
            tokio::spawn(async move { this.run_worker(model_id, mq).await });
        }

        request_id
    }

    /// Admits up to `max_concurrent_per_model` requests at once: pops the
    /// FIFO as soon as a slot is free and dispatches the executor onto its
    /// own task rather than awaiting it here, so the coordinating loop
    /// never blocks on one request's work to admit the next (spec §4.K —
    /// "drop the lock and run the executor on a thread separate from the
    /// coordinating scheduler").
    async fn run_worker(self: Arc<Self>, _model_id: String, mq: Arc<ModelQueue>) {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                mq.state.lock().worker_running = false;
                return;
            }

            loop {
                let active_count = mq.active.lock().len();
                if active_count < self.max_concurrent_per_model {
                    break;
                }
                mq.notify_slot.notified().await;
            }

            let next = {
                let mut qs = mq.state.lock();
                match qs.fifo.pop_front() {
                    Some(item) => {
                        Self::recompute_positions(&qs.fifo);
                        Some(item)
                    }
                    None => {
                        qs.worker_running = false;
                        None
                    }
                }
            };

            let Some(state) = next else { return };

            mq.active.lock().insert(state.request_id.clone());
            *state.status.lock() = InternalStatus::Running;

            let mq_task = mq.clone();
            tokio::spawn(async move {
                let executor = state.executor.lock().take();
                let result = match executor {
                    Some(exec) => exec().await,
                    None => Err(Error::Internal("request had no executor registered".into())),
                };

                let final_status = if state.cancelled.load(Ordering::SeqCst) {
                    InternalStatus::Cancelled
                } else {
                    match result {
                        Ok(output) => InternalStatus::Completed(output),
                        Err(err) => InternalStatus::Failed { code: err.code(), message: err.to_string() },
                    }
                };
                *state.status.lock() = final_status;
                state.notify.notify_waiters();

                mq_task.active.lock().remove(&state.request_id);
                mq_task.notify_slot.notify_waiters();
            });
        }
    }

    /// `true` if the request existed and was queued (removed from the
    /// FIFO) or running (cooperative flag set, the executor must observe
    /// it); `false` if unknown or already terminal.
    pub fn cancel(&self, request_id: &str) -> bool {
        let Some(state) = self.requests.lock().get(request_id).cloned() else { return false };
        let mut status = state.status.lock();
        match &*status {
            InternalStatus::Queued => {
                *status = InternalStatus::Cancelled;
                drop(status);
                state.notify.notify_waiters();
                if let Some(mq) = self.model_queues.lock().get(&state.model_id).cloned() {
                    let mut qs = mq.state.lock();
                    qs.fifo.retain(|r| r.request_id != request_id);
                    Self::recompute_positions(&qs.fifo);
                }
                true
            }
            InternalStatus::Running => {
                state.cancelled.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, request_id: &str) -> Option<RequestStatusView> {
        let state = self.requests.lock().get(request_id).cloned()?;
        let position = self.model_queues.lock().get(&state.model_id).map(|mq| {
            let qs = mq.state.lock();
            qs.fifo.iter().position(|r| r.request_id == request_id)
        }).flatten();
        Some(view(&state, position))
    }

    /// Blocks until the request reaches a terminal state, or `timeout`
    /// elapses (returning whatever status is current at that point).
    pub async fn wait_for_completion(&self, request_id: &str, timeout: Option<Duration>) -> Option<RequestStatusView> {
        let state = self.requests.lock().get(request_id).cloned()?;
        loop {
            let notified = state.notify.notified();
            {
                let is_terminal = matches!(
                    &*state.status.lock(),
                    InternalStatus::Completed(_) | InternalStatus::Failed { .. } | InternalStatus::Cancelled
                );
                if is_terminal {
                    return Some(view(&state, None));
                }
            }
            match timeout {
                Some(d) => {
                    if tokio::time::timeout(d, notified).await.is_err() {
                        return Some(view(&state, None));
                    }
                }
                None => notified.await,
            }
        }
    }

    pub fn queue_info(&self, model_id: &str) -> QueueInfo {
        match self.model_queues.lock().get(model_id).cloned() {
            Some(mq) => {
                let qs = mq.state.lock();
                let queued_request_ids: Vec<String> = qs.fifo.iter().map(|r| r.request_id.clone()).collect();
                let active_request_ids: Vec<String> = mq.active.lock().iter().cloned().collect();
                QueueInfo {
                    queue_depth: queued_request_ids.len(),
                    active_count: active_request_ids.len(),
                    queued_request_ids,
                    active_request_ids,
                }
            }
            None => QueueInfo { queue_depth: 0, active_count: 0, queued_request_ids: vec![], active_request_ids: vec![] },
        }
    }

    /// Signals all workers to stop pulling new work after their current
    /// item; does not forcibly abort in-flight executors.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        for mq in self.model_queues.lock().values() {
            mq.notify_slot.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_executor(text: &'static str) -> Executor {
        Box::new(move || {
            Box::pin(async move { Ok(GenerateOutput { text: Some(text.to_string()), artifacts: None, usage: None }) })
        })
    }

    #[tokio::test]
    async fn enqueue_and_await_completion() {
        let queue = RequestQueue::new(10, 1);
        let id = queue.enqueue("m1", ok_executor("hi"));
        let view = queue.wait_for_completion(&id, None).await.unwrap();
        assert_eq!(view.status, RequestStatus::Completed);
        assert_eq!(view.output.unwrap().text.unwrap(), "hi");
    }

    #[tokio::test]
    async fn queue_full_fails_immediately() {
        let queue = RequestQueue::new(0, 1);
        let id = queue.enqueue("m1", ok_executor("hi"));
        let view = queue.status(&id).unwrap();
        assert_eq!(view.status, RequestStatus::Failed);
        assert_eq!(view.error.unwrap().code, "queue_full");
    }

    #[tokio::test]
    async fn cancel_queued_request_before_it_runs() {
        let queue = RequestQueue::new(10, 1);
        // Occupy the single concurrency slot with a long-running request.
        let blocker = Box::new(|| -> ExecutorFuture {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(GenerateOutput::default())
            })
        });
        let _blocker_id = queue.enqueue("m1", blocker);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let queued_id = queue.enqueue("m1", ok_executor("second"));
        assert!(queue.cancel(&queued_id));
        let view = queue.status(&queued_id).unwrap();
        assert_eq!(view.status, RequestStatus::Cancelled);
    }

    #[tokio::test]
    async fn concurrency_limit_serializes_per_model() {
        let queue = RequestQueue::new(10, 1);
        let id_a = queue.enqueue("m1", ok_executor("a"));
        let id_b = queue.enqueue("m1", ok_executor("b"));
        let view_a = queue.wait_for_completion(&id_a, None).await.unwrap();
        let view_b = queue.wait_for_completion(&id_b, None).await.unwrap();
        assert_eq!(view_a.status, RequestStatus::Completed);
        assert_eq!(view_b.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn queue_info_reports_pending_and_active() {
        let queue = RequestQueue::new(10, 1);
        let blocker = Box::new(|| -> ExecutorFuture {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(GenerateOutput::default())
            })
        });
        let _ = queue.enqueue("m1", blocker);
        let _ = queue.enqueue("m1", ok_executor("queued"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let info = queue.queue_info("m1");
        assert_eq!(info.active_count, 1);
        assert_eq!(info.queue_depth, 1);
    }

    #[tokio::test]
    async fn concurrency_cap_above_one_runs_requests_in_parallel() {
        use std::sync::atomic::AtomicUsize;

        let queue = RequestQueue::new(10, 2);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let make_executor = |concurrent: Arc<AtomicUsize>, peak: Arc<AtomicUsize>| -> Executor {
            Box::new(move || -> ExecutorFuture {
                Box::pin(async move {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    Ok(GenerateOutput::default())
                })
            })
        };

        let id_a = queue.enqueue("m1", make_executor(concurrent.clone(), peak.clone()));
        let id_b = queue.enqueue("m1", make_executor(concurrent.clone(), peak.clone()));
        queue.wait_for_completion(&id_a, None).await;
        queue.wait_for_completion(&id_b, None).await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }
}

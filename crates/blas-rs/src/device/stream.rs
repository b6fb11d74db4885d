use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::status::{BlasError, BlasResult};

type Job = Box<dyn FnOnce() -> BlasResult<()> + Send + 'static>;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// In-order asynchronous work queue backed by a worker thread.
///
/// Clones refer to the same queue. The worker exits once the last clone is dropped and all
/// enqueued work has run. The first failure raised by enqueued work is kept until the next
/// [`Stream::synchronize`] reports it.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    id: u64,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<StreamState>,
    idle: Condvar,
}

#[derive(Default)]
struct StreamState {
    pending: usize,
    error: Option<BlasError>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").field("id", &self.inner.id).finish()
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Stream {}

impl Stream {
    /// Spawns a new stream worker. Failure to spawn maps to `InvalidValue`.
    pub fn new() -> BlasResult<Self> {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel::<Job>();
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("blasrs-stream-{id}"))
            .spawn(move || run_worker(receiver, worker_shared))
            .map_err(|err| {
                BlasError::invalid_value(format!("failed to spawn stream worker: {err}"))
            })?;
        log::debug!("stream {id} started");
        Ok(Self {
            inner: Arc::new(StreamInner {
                id,
                sender: Mutex::new(Some(sender)),
                shared,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Queues `job` behind all previously enqueued work and returns immediately.
    pub fn enqueue<F>(&self, job: F) -> BlasResult<()>
    where
        F: FnOnce() -> BlasResult<()> + Send + 'static,
    {
        self.inner.shared.state.lock().pending += 1;
        let sent = match self.inner.sender.lock().as_ref() {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        };
        if !sent {
            let mut state = self.inner.shared.state.lock();
            state.pending -= 1;
            self.inner.shared.idle.notify_all();
            return Err(BlasError::invalid_value(format!(
                "stream {} is no longer accepting work",
                self.inner.id
            )));
        }
        Ok(())
    }

    /// Blocks until every enqueued job has finished, then reports and clears the first
    /// asynchronous failure.
    pub fn synchronize(&self) -> BlasResult<()> {
        let mut state = self.inner.shared.state.lock();
        while state.pending > 0 {
            self.inner.shared.idle.wait(&mut state);
        }
        match state.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of jobs enqueued but not yet finished.
    pub fn pending(&self) -> usize {
        self.inner.shared.state.lock().pending
    }
}

fn run_worker(receiver: mpsc::Receiver<Job>, shared: Arc<Shared>) {
    for job in receiver {
        let result = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(result) => result,
            Err(_) => Err(BlasError::invalid_value("stream job panicked")),
        };
        let mut state = shared.state.lock();
        if let Err(err) = result {
            log::debug!("stream job failed: {err}");
            if state.error.is_none() {
                state.error = Some(err);
            }
        }
        state.pending -= 1;
        if state.pending == 0 {
            shared.idle.notify_all();
        }
    }
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
        log::debug!("stream {} stopped", self.id);
    }
}

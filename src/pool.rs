//! Bounded worker pool.
//!
//! Jobs are pulled from the producer's iterator on the calling thread and handed over to a `rayon` thread pool.
//! A hand-off blocks until one of the worker slots is free, so at most `workers` jobs are in flight and one more
//! is being produced. The first failed job cancels the run: the producer is no longer polled, nothing new is
//! dispatched and the jobs already running are awaited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{self, Receiver, Sender};
use log;
use parking_lot::Mutex;

use crate::sort::SortError;

/// Cooperative cancellation signal.
///
/// Clones share the same signal. A child token is cancelled together with its parent, while cancelling the child
/// leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.ancestors.iter().any(|flag| flag.load(Ordering::SeqCst))
    }

    /// Creates a token which is cancelled whenever this one is.
    pub fn child_token(&self) -> CancellationToken {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.cancelled.clone());

        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }
}

/// Counting semaphore: a token in the channel is a permit in use.
struct Permits {
    taken: Sender<()>,
    returned: Receiver<()>,
}

impl Permits {
    fn new(count: usize) -> Self {
        let (taken, returned) = crossbeam_channel::bounded(count);
        Permits { taken, returned }
    }

    /// Blocks until a permit is available.
    fn acquire(&self) -> Permit<'_> {
        // both channel ends live as long as `self`, sending can't fail
        let _ = self.taken.send(());
        Permit {
            returned: &self.returned,
        }
    }
}

struct Permit<'a> {
    returned: &'a Receiver<()>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.returned.try_recv();
    }
}

/// Thread pool running at most a fixed number of jobs at once.
pub struct WorkerPool {
    thread_pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Creates a pool of `workers` threads. If the parameter is [`None`] the thread number is selected based on
    /// available CPU core number.
    pub fn new(workers: Option<usize>) -> Result<Self, SortError> {
        let mut thread_pool_builder =
            rayon::ThreadPoolBuilder::new().thread_name(|idx| format!("chunk-worker-{}", idx));

        match workers {
            Some(0) => return Err(SortError::Config("worker count must be greater than 0".to_owned())),
            Some(workers) => {
                log::info!("initializing worker pool (workers: {})", workers);
                thread_pool_builder = thread_pool_builder.num_threads(workers);
            }
            None => log::info!("initializing worker pool (workers: default)"),
        }

        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(WorkerPool { thread_pool });
    }

    /// Maximum number of jobs running at once.
    pub fn workers(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    /// Runs `task` for every job produced by `jobs`.
    ///
    /// The producer is polled on the calling thread; a producer error is treated like a job error. Returns the
    /// first error, [`SortError::Cancelled`] if `cancel` was triggered from outside, or the number of dispatched
    /// jobs.
    pub fn run<T, I, F>(&self, jobs: I, cancel: &CancellationToken, task: F) -> Result<usize, SortError>
    where
        T: Send,
        I: IntoIterator<Item = Result<T, SortError>>,
        F: Fn(T) -> Result<(), SortError> + Sync,
    {
        let permits = Permits::new(self.workers());
        let first_error: Mutex<Option<SortError>> = Mutex::new(None);
        let mut dispatched = 0;

        let fail = |err: SortError| {
            log::debug!("cancelling workers: {}", err);
            let mut slot = first_error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
            cancel.cancel();
        };
        let (task, fail) = (&task, &fail);

        self.thread_pool.in_place_scope(|scope| {
            for job in jobs {
                let job = match job {
                    Ok(job) => job,
                    Err(err) => {
                        fail(err);
                        break;
                    }
                };

                let permit = permits.acquire();
                if cancel.is_cancelled() {
                    break;
                }

                dispatched += 1;
                scope.spawn(move |_| {
                    let _permit = permit;
                    if let Err(err) = task(job) {
                        fail(err);
                    }
                });
            }
        });

        match first_error.into_inner() {
            Some(err) => Err(err),
            None if cancel.is_cancelled() => Err(SortError::Cancelled),
            None => Ok(dispatched),
        }
    }
}

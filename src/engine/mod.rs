//! Distributed execution engine
//!
//! Per-execution wiring of the background components:
//!
//! - one feeder thread chunking the source onto the bounded feed queue;
//! - one task-tracker thread owning the outstanding-chunk count;
//! - N worker threads executing the chain + aggregator per chunk;
//! - the calling thread draining results through the yielder.
//!
//! All cross-thread communication goes through the four channels (feed,
//! result, announce, complete) plus the two completion flags. Every
//! blocking operation uses a sub-second timeout so each loop re-checks
//! termination at bounded intervals; that is what makes cancellation
//! responsive and rules out deadlock between a bounded queue and a
//! consumer that stopped consuming.
//!
//! # Completion invariant
//!
//! The engine declares overall completion only when feeding is done and
//! the outstanding chunk count has returned to zero, or when the caller
//! cancels. Chunks already pulled by a worker are never dropped; chunks
//! still queued at cancellation are abandoned.

mod feeder;
mod tracker;
mod worker;
mod yielder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded};
use log::{debug, warn};

use crate::chain::Executor;
use crate::errors::QueryResult;

use feeder::Feeder;
use tracker::TaskTracker;
use worker::Worker;
use yielder::Yielder;

/// Poll interval for every timed queue operation and termination re-check.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A batch of source elements moved as one unit across the feed boundary.
pub(crate) type Chunk<T> = Vec<T>;

/// Failure captured from a panicking chunk execution.
#[derive(Debug)]
pub(crate) struct WorkerFailure {
    pub(crate) message: String,
}

/// The two completion flags shared by every component. The feed queue,
/// result queue and the two accounting channels carry everything else.
#[derive(Debug, Default)]
pub(crate) struct Signals {
    feeding_done: AtomicBool,
    all_done: AtomicBool,
}

impl Signals {
    /// True once the source has been fully fed, or the query cancelled.
    pub(crate) fn feeding_done(&self) -> bool {
        self.feeding_done.load(Ordering::Acquire)
    }

    pub(crate) fn set_feeding_done(&self) {
        self.feeding_done.store(true, Ordering::Release);
    }

    /// True once every fed chunk has been confirmed downstream, or the
    /// query cancelled. The authoritative terminal condition.
    pub(crate) fn all_done(&self) -> bool {
        self.all_done.load(Ordering::Acquire)
    }

    pub(crate) fn set_all_done(&self) {
        self.all_done.store(true, Ordering::Release);
    }
}

/// Handle to one running execution: the yielder plus everything needed to
/// tear the background components down.
pub(crate) struct Pipeline<R> {
    yielder: Yielder<R>,
    signals: Arc<Signals>,
    drain_feed: Box<dyn Fn() + Send>,
    handles: Vec<JoinHandle<()>>,
    closed: bool,
}

/// Spawn feeder, tracker and workers for one execution of `executor` over
/// `source`, and return the consumer-side handle.
pub(crate) fn launch<S, I, R>(
    source: S,
    executor: Executor<I, R>,
    workers: usize,
    chunk_size: usize,
) -> Pipeline<R>
where
    S: Iterator<Item = I> + Send + 'static,
    I: Send + 'static,
    R: Send + 'static,
{
    let workers = workers.max(1);
    let chunk_size = chunk_size.max(1);
    // Bounded at 2x worker count: a slow consumer or slow feeder throttles
    // the other side instead of growing memory without bound.
    let capacity = workers * 2;

    let (feed_tx, feed_rx) = bounded::<Chunk<I>>(capacity);
    let (result_tx, result_rx) = bounded::<Result<R, WorkerFailure>>(capacity);
    let (announce_tx, announce_rx) = unbounded::<()>();
    let (complete_tx, complete_rx) = unbounded::<()>();
    let signals = Arc::new(Signals::default());

    let mut handles = Vec::with_capacity(workers + 2);
    handles.push(
        Feeder {
            source,
            chunk_size,
            feed_tx,
            announce_tx,
            signals: Arc::clone(&signals),
        }
        .spawn(),
    );
    handles.push(
        TaskTracker {
            announce_rx,
            complete_rx,
            signals: Arc::clone(&signals),
        }
        .spawn(),
    );
    for index in 0..workers {
        handles.push(
            Worker {
                index,
                feed_rx: feed_rx.clone(),
                result_tx: result_tx.clone(),
                executor: executor.clone(),
                signals: Arc::clone(&signals),
            }
            .spawn(),
        );
    }
    // Workers hold the only result senders: the channel disconnecting means
    // no result will ever arrive again.
    drop(result_tx);

    debug!(
        "pipeline: launched {} workers, chunk_size {}, queue capacity {}",
        workers, chunk_size, capacity
    );

    Pipeline {
        yielder: Yielder::new(result_rx, complete_tx, Arc::clone(&signals)),
        signals,
        drain_feed: Box::new(move || while feed_rx.try_recv().is_ok() {}),
        handles,
        closed: false,
    }
}

impl<R> Pipeline<R> {
    /// Next per-chunk partial, or `None` once all work is complete. The
    /// first worker failure closes the pipeline and is returned as an error.
    pub(crate) fn next_partial(&mut self) -> Option<QueryResult<R>> {
        match self.yielder.next_partial() {
            Some(Ok(partial)) => Some(Ok(partial)),
            Some(Err(err)) => {
                self.close();
                Some(Err(err))
            }
            None => None,
        }
    }

    /// Stop every background component and reclaim their threads. Chunks
    /// still queued are drained, not processed. Safe to call repeatedly.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.signals.set_feeding_done();
        self.signals.set_all_done();
        (self.drain_feed)();
        self.yielder.drain();

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("pipeline: background thread panicked during shutdown");
            }
        }
        debug!("pipeline: closed");
    }
}

impl<R> Drop for Pipeline<R> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::{Duration, Instant};

    /// Poll `condition` until it holds or five seconds elapse.
    pub(crate) fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

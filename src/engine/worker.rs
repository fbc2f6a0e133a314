//! Worker pool: chunk execution threads
//!
//! Each worker holds an immutable clone of the executor and loops: pull one
//! chunk with a short timeout, re-check the termination signal, execute,
//! publish the partial result. Missing the timeout just re-checks and loops
//! again; that is the whole shutdown mechanism, no kill signal exists.
//!
//! A panic in a user-supplied function is caught per chunk and published on
//! the result channel as a failure instead of silently killing the worker
//! and leaving the tracker waiting forever.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::error;

use crate::chain::Executor;

use super::{Chunk, Signals, WorkerFailure, POLL_INTERVAL};

pub(super) struct Worker<I, R> {
    pub(super) index: usize,
    pub(super) feed_rx: Receiver<Chunk<I>>,
    pub(super) result_tx: Sender<Result<R, WorkerFailure>>,
    pub(super) executor: Executor<I, R>,
    pub(super) signals: Arc<Signals>,
}

impl<I, R> Worker<I, R>
where
    I: Send + 'static,
    R: Send + 'static,
{
    pub(super) fn spawn(self) -> JoinHandle<()> {
        thread::Builder::new()
            .name(format!("plinq-worker-{}", self.index))
            .spawn(move || self.run())
            .expect("failed to spawn worker thread")
    }

    fn run(self) {
        loop {
            if self.signals.all_done() {
                return;
            }
            let chunk = match self.feed_rx.recv_timeout(POLL_INTERVAL) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => continue,
                // Feeder gone and queue drained: no further work exists.
                Err(RecvTimeoutError::Disconnected) => return,
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.executor.execute(chunk)))
                .map_err(|payload| WorkerFailure {
                    message: panic_message(payload),
                });
            if let Err(failure) = &outcome {
                error!(
                    "worker {}: chunk execution panicked: {}",
                    self.index, failure.message
                );
            }
            if !self.publish(outcome) {
                return;
            }
        }
    }

    /// Blocking publish with periodic termination re-checks. Returns false
    /// when the pipeline shut down before the result could be queued.
    fn publish(&self, outcome: Result<R, WorkerFailure>) -> bool {
        let mut pending = outcome;
        loop {
            match self.result_tx.send_timeout(pending, POLL_INTERVAL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(outcome)) => {
                    if self.signals.all_done() {
                        return false;
                    }
                    pending = outcome;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Chain, Count, Select};
    use crossbeam_channel::{bounded, unbounded};

    fn spawn_worker<R: Send + 'static>(
        executor: Executor<i64, R>,
    ) -> (
        Sender<Chunk<i64>>,
        Receiver<Result<R, WorkerFailure>>,
        Arc<Signals>,
        JoinHandle<()>,
    ) {
        let (feed_tx, feed_rx) = bounded(4);
        let (result_tx, result_rx) = unbounded();
        let signals = Arc::new(Signals::default());
        let handle = Worker {
            index: 0,
            feed_rx,
            result_tx,
            executor,
            signals: Arc::clone(&signals),
        }
        .spawn();
        (feed_tx, result_rx, signals, handle)
    }

    #[test]
    fn test_worker_executes_chunks_until_feed_disconnects() {
        let executor = Executor::new(Chain::<i64, i64>::identity(), Count);
        let (feed_tx, result_rx, _signals, handle) = spawn_worker(executor);

        feed_tx.send(vec![1, 2, 3]).unwrap();
        feed_tx.send(vec![4]).unwrap();
        drop(feed_tx);
        handle.join().unwrap();

        let counts: Vec<usize> = result_rx.iter().map(|r| r.unwrap()).collect();
        assert_eq!(counts, vec![3, 1]);
    }

    #[test]
    fn test_worker_reports_panic_instead_of_dying_silently() {
        fn explode(x: i64) -> i64 {
            if x == 2 {
                panic!("bad element");
            }
            x
        }
        let chain = Chain::identity().then(Select::new(explode));
        let executor = Executor::new(chain, Count);
        let (feed_tx, result_rx, _signals, handle) = spawn_worker(executor);

        feed_tx.send(vec![1, 2, 3]).unwrap();
        drop(feed_tx);
        handle.join().unwrap();

        let failure = result_rx.recv().unwrap().unwrap_err();
        assert!(failure.message.contains("bad element"));
    }

    #[test]
    fn test_worker_exits_on_termination_signal() {
        let executor = Executor::new(Chain::<i64, i64>::identity(), Count);
        let (_feed_tx, _result_rx, signals, handle) = spawn_worker(executor);

        signals.set_all_done();
        handle.join().unwrap();
    }
}

//! Yielder: sole drain of the result queue
//!
//! Delivers per-chunk partials to the consuming thread and confirms each
//! chunk to the task tracker. Confirmation is deferred to the next pull, so
//! a completion token is only ever sent after downstream has fully observed
//! the previous chunk's results. The tracker can therefore never declare
//! completion while a delivered result is still in flight.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::errors::{QueryError, QueryResult};

use super::{Signals, WorkerFailure, POLL_INTERVAL};

/// Polls to wait, after the result channel disconnects, for the tracker's
/// verdict before declaring the pipeline dead.
const DISCONNECT_GRACE_TICKS: u32 = 50;

pub(super) struct Yielder<R> {
    result_rx: Receiver<Result<R, WorkerFailure>>,
    complete_tx: Sender<()>,
    signals: Arc<Signals>,
    unacknowledged: bool,
}

impl<R> Yielder<R> {
    pub(super) fn new(
        result_rx: Receiver<Result<R, WorkerFailure>>,
        complete_tx: Sender<()>,
        signals: Arc<Signals>,
    ) -> Self {
        Self {
            result_rx,
            complete_tx,
            signals,
            unacknowledged: false,
        }
    }

    /// Confirm the previously delivered chunk, if any.
    fn acknowledge(&mut self) {
        if self.unacknowledged {
            let _ = self.complete_tx.send(());
            self.unacknowledged = false;
        }
    }

    /// Next per-chunk partial. Returns `None` once all work is complete.
    pub(super) fn next_partial(&mut self) -> Option<QueryResult<R>> {
        self.acknowledge();
        let mut grace = DISCONNECT_GRACE_TICKS;
        loop {
            if self.signals.all_done() {
                // Results still queued on the cancel path are abandoned.
                return None;
            }
            match self.result_rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(partial)) => {
                    self.unacknowledged = true;
                    return Some(Ok(partial));
                }
                Ok(Err(failure)) => {
                    return Some(Err(QueryError::WorkerPanic(failure.message)));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Every worker has exited. The tracker owes its verdict
                    // once the last confirmation lands; wait a bounded
                    // number of ticks for it.
                    grace -= 1;
                    if grace == 0 {
                        return Some(Err(QueryError::Disconnected));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }

    /// Discard anything still queued. Used on close.
    pub(super) fn drain(&mut self) {
        while self.result_rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn yielder<R>() -> (
        Sender<Result<R, WorkerFailure>>,
        Receiver<()>,
        Arc<Signals>,
        Yielder<R>,
    ) {
        let (result_tx, result_rx) = unbounded();
        let (complete_tx, complete_rx) = unbounded();
        let signals = Arc::new(Signals::default());
        let y = Yielder::new(result_rx, complete_tx, Arc::clone(&signals));
        (result_tx, complete_rx, signals, y)
    }

    #[test]
    fn test_confirmation_is_deferred_until_next_pull() {
        let (result_tx, complete_rx, signals, mut y) = yielder::<Vec<i64>>();

        result_tx.send(Ok(vec![1, 2])).unwrap();
        result_tx.send(Ok(vec![3])).unwrap();

        assert_eq!(y.next_partial().unwrap().unwrap(), vec![1, 2]);
        // first chunk delivered but not yet confirmed
        assert_eq!(complete_rx.try_iter().count(), 0);

        assert_eq!(y.next_partial().unwrap().unwrap(), vec![3]);
        assert_eq!(complete_rx.try_iter().count(), 1);

        signals.set_all_done();
        assert!(y.next_partial().is_none());
        assert_eq!(complete_rx.try_iter().count(), 1);
    }

    #[test]
    fn test_worker_failure_is_surfaced() {
        let (result_tx, _complete_rx, _signals, mut y) = yielder::<Vec<i64>>();

        result_tx
            .send(Err(WorkerFailure {
                message: "boom".to_string(),
            }))
            .unwrap();

        match y.next_partial() {
            Some(Err(QueryError::WorkerPanic(message))) => assert!(message.contains("boom")),
            other => panic!("unexpected outcome: {:?}", other.map(|r| r.is_ok())),
        }
    }

    #[test]
    fn test_all_done_with_empty_queue_ends_iteration() {
        let (_result_tx, _complete_rx, signals, mut y) = yielder::<Vec<i64>>();
        signals.set_all_done();
        assert!(y.next_partial().is_none());
    }
}

//! Task tracker: single owner of the outstanding-chunk count
//!
//! The counter is a local variable of the tracker's loop; nothing else can
//! mutate it, and every observation arrives through the announce and
//! complete channels. Announcing happens the moment a chunk is fed, confirmation
//! only after the yielder has emitted the chunk's results downstream. That
//! gap is what prevents premature termination: a worker may still be
//! mid-flight on the last chunk when feeding ends.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::debug;

use super::{Signals, POLL_INTERVAL};

pub(super) struct TaskTracker {
    pub(super) announce_rx: Receiver<()>,
    pub(super) complete_rx: Receiver<()>,
    pub(super) signals: Arc<Signals>,
}

impl TaskTracker {
    pub(super) fn spawn(self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("plinq-tracker".into())
            .spawn(move || self.run())
            .expect("failed to spawn tracker thread")
    }

    fn run(self) {
        let mut outstanding: u64 = 0;

        // Phase 1: count announced chunks until the feeder hangs up.
        loop {
            match self.announce_rx.recv_timeout(POLL_INTERVAL) {
                Ok(()) => outstanding += 1,
                Err(RecvTimeoutError::Timeout) => {
                    if self.signals.all_done() {
                        // cancelled before feeding finished
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("tracker: feeding done, {} chunks announced", outstanding);

        // Phase 2: wait for downstream confirmation of every chunk.
        while outstanding > 0 && !self.signals.all_done() {
            match self.complete_rx.recv_timeout(POLL_INTERVAL) {
                Ok(()) => outstanding -= 1,
                Err(RecvTimeoutError::Timeout) => {}
                // The consumer dropped mid-iteration; nothing further will
                // be confirmed.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.signals.set_all_done();
        debug!("tracker: all work complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::wait_for;
    use crossbeam_channel::unbounded;

    type Channels = (
        crossbeam_channel::Sender<()>,
        crossbeam_channel::Sender<()>,
        JoinHandle<()>,
    );

    fn start(signals: &Arc<Signals>) -> Channels {
        let (announce_tx, announce_rx) = unbounded();
        let (complete_tx, complete_rx) = unbounded();
        let handle = TaskTracker {
            announce_rx,
            complete_rx,
            signals: Arc::clone(signals),
        }
        .spawn();
        (announce_tx, complete_tx, handle)
    }

    #[test]
    fn test_completion_requires_sentinel_and_zero_outstanding() {
        let signals = Arc::new(Signals::default());
        let (announce_tx, complete_tx, handle) = start(&signals);

        for _ in 0..3 {
            announce_tx.send(()).unwrap();
        }
        complete_tx.send(()).unwrap();
        complete_tx.send(()).unwrap();
        drop(announce_tx);

        // sentinel observed but one chunk still unconfirmed: not complete
        std::thread::sleep(POLL_INTERVAL * 3);
        assert!(!signals.all_done());

        complete_tx.send(()).unwrap();
        assert!(wait_for(|| signals.all_done()));
        handle.join().unwrap();
    }

    #[test]
    fn test_zero_chunks_completes_immediately_after_sentinel() {
        let signals = Arc::new(Signals::default());
        let (announce_tx, _complete_tx, handle) = start(&signals);

        drop(announce_tx);
        assert!(wait_for(|| signals.all_done()));
        handle.join().unwrap();
    }

    #[test]
    fn test_cancellation_unblocks_both_phases() {
        let signals = Arc::new(Signals::default());
        let (announce_tx, _complete_tx, handle) = start(&signals);

        announce_tx.send(()).unwrap();
        signals.set_all_done();
        handle.join().unwrap();
    }
}

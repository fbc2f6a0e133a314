//! Feeder: chunks the source and publishes work
//!
//! Consumes the source sequence exactly once, groups elements into chunks
//! of `chunk_size`, publishes each chunk on the bounded feed queue and
//! announces one unit of outstanding work per chunk. The cancellation
//! signal is checked at least once per element, so an early close never
//! drains a huge source after the caller has lost interest.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{SendTimeoutError, Sender};
use log::debug;

use super::{Chunk, Signals, POLL_INTERVAL};

pub(super) struct Feeder<S: Iterator> {
    pub(super) source: S,
    pub(super) chunk_size: usize,
    pub(super) feed_tx: Sender<Chunk<S::Item>>,
    pub(super) announce_tx: Sender<()>,
    pub(super) signals: Arc<Signals>,
}

impl<S> Feeder<S>
where
    S: Iterator + Send + 'static,
    S::Item: Send + 'static,
{
    pub(super) fn spawn(self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("plinq-feeder".into())
            .spawn(move || self.run())
            .expect("failed to spawn feeder thread")
    }

    fn run(mut self) {
        let mut chunk = Vec::with_capacity(self.chunk_size);
        let mut fed = 0usize;

        while let Some(item) = self.source.next() {
            if self.signals.feeding_done() {
                debug!("feeder: cancelled after {} chunks", fed);
                return;
            }
            chunk.push(item);
            if chunk.len() >= self.chunk_size {
                let full = std::mem::replace(&mut chunk, Vec::with_capacity(self.chunk_size));
                if !self.offer(full) {
                    return;
                }
                fed += 1;
            }
        }

        // Trailing partial chunk, if any.
        if !chunk.is_empty() {
            if !self.offer(chunk) {
                return;
            }
            fed += 1;
        }

        self.signals.set_feeding_done();
        debug!("feeder: all data fed ({} chunks)", fed);
        // announce_tx drops here: the disconnect is the tracker's sentinel
        // that no further tasks will be announced.
    }

    /// Blocking publish with periodic cancellation re-checks. Announces the
    /// task only once the chunk is queued. Returns false when the pipeline
    /// shut down before the chunk could be placed.
    fn offer(&self, chunk: Chunk<S::Item>) -> bool {
        let mut pending = chunk;
        loop {
            match self.feed_tx.send_timeout(pending, POLL_INTERVAL) {
                Ok(()) => {
                    let _ = self.announce_tx.send(());
                    return true;
                }
                Err(SendTimeoutError::Timeout(chunk)) => {
                    if self.signals.feeding_done() {
                        return false;
                    }
                    pending = chunk;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

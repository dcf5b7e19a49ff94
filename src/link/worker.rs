//! Receive and dispatch workers
//!
//! Receive: transport -> codec -> queue. Dispatch: queue -> listeners.
//!
//! Both run on dedicated threads while the link is connected. The queue is an
//! unbounded `mpsc` channel: the receive side never blocks and never drops a
//! decoded message. The receiver owns the only `Sender`, so dropping it is
//! what ends the dispatcher once the queue is drained.

use super::registry::ListenerRegistry;
use super::stats::Stats;
use super::{DisconnectReason, Shared};
use crate::codec::{Codec, Message};
use crate::constants::READ_CHUNK_SIZE;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn, Span};

/// Everything the receive thread needs
pub(super) struct ReceiveWorker<C: Codec + 'static> {
    pub link: Weak<Shared<C>>,
    pub transport: Arc<dyn Transport>,
    pub running: Arc<AtomicBool>,
    pub queue: Sender<Message>,
    pub stats: Arc<Stats>,
    pub span: Span,
}

impl<C: Codec + 'static> ReceiveWorker<C> {
    pub fn run(self) {
        let span = self.span.clone();
        let _enter = span.enter();
        debug!("Receive loop started on {}", self.transport.describe());

        let mut lost = false;
        while self.running.load(Ordering::SeqCst) {
            let data = match self.transport.read(READ_CHUNK_SIZE) {
                Ok(data) => data,
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        warn!("Transport lost: {}", e);
                        lost = true;
                    }
                    break;
                }
            };
            if data.is_empty() {
                continue;
            }
            self.stats.add_rx(data.len());

            let Some(link) = self.link.upgrade() else {
                break;
            };
            let mut decoded = 0;
            let corrupt = link.codec.lock().decode(&data, |msg| {
                decoded += 1;
                // Send only fails once the dispatcher is gone, i.e. during teardown
                let _ = self.queue.send(msg);
            });
            self.stats.add_decoded(decoded);
            if corrupt > 0 {
                self.stats.add_corrupt(corrupt);
                debug!("Discarded {} corrupt frame(s)", corrupt);
            }
        }

        // No more pushes past this point
        let ReceiveWorker {
            link,
            transport,
            queue,
            ..
        } = self;
        drop(queue);

        match link.upgrade() {
            Some(link) if lost => {
                link.teardown(DisconnectReason::TransportLost);
            }
            Some(_) => {}
            // Link dropped while connected: nobody else will close the port
            None => transport.disconnect(),
        }
        debug!("Receive loop stopped");
    }
}

/// Everything the dispatch thread needs
pub(super) struct DispatchWorker {
    pub listeners: Arc<ListenerRegistry>,
    pub running: Arc<AtomicBool>,
    pub queue: Receiver<Message>,
    pub poll: Duration,
    pub stats: Arc<Stats>,
    pub span: Span,
}

impl DispatchWorker {
    pub fn run(self) {
        let _enter = self.span.enter();
        debug!("Dispatch loop started");

        while self.running.load(Ordering::SeqCst) {
            match self.queue.recv_timeout(self.poll) {
                Ok(msg) => {
                    // A listener may tear the link down; the rest must not run after that
                    let failures = self
                        .listeners
                        .dispatch_while(&msg, || self.running.load(Ordering::SeqCst));
                    for _ in 0..failures {
                        self.stats.add_listener_failure();
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("Dispatch loop stopped");
    }
}

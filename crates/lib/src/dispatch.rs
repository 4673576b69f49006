//! Per-event entry point: filter, classify, reply.
//!
//! Replies are produced on spawned tasks so a slow command never blocks the event loop.
//! Commands additionally hold a worker permit, which bounds how many processes run at once.
//! Each event yields at most one reply, always threaded under the triggering message.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use crate::channels::{EventKind, InboundMessage, OutboundReply, ReplySink};
use crate::intent::{Classifier, Intent};

/// Decrements the in-flight counter when a dispatch task ends or is aborted.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Dispatcher {
    channel_id: String,
    classifier: Arc<Classifier>,
    sink: Arc<dyn ReplySink>,
    workers: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    /// `workers` is clamped to at least one.
    pub fn new(
        channel_id: impl Into<String>,
        classifier: Classifier,
        sink: Arc<dyn ReplySink>,
        workers: usize,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            classifier: Arc::new(classifier),
            sink,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
            tasks: JoinSet::new(),
        }
    }

    /// Shared count of dispatches still producing a reply.
    pub fn in_flight(&self) -> Arc<AtomicUsize> {
        self.in_flight.clone()
    }

    /// Handle one transport event. Events from other channels or of other kinds never reach
    /// the classifier.
    pub fn on_event(&mut self, msg: InboundMessage) {
        self.reap_finished();
        if msg.channel_id != self.channel_id {
            return;
        }
        if msg.event_kind != EventKind::Posted {
            return;
        }
        let intent = self.classifier.classify(&msg);
        if intent == Intent::Ignore {
            return;
        }
        let needs_worker = matches!(intent, Intent::Command(_));
        let classifier = self.classifier.clone();
        let sink = self.sink.clone();
        let workers = self.workers.clone();
        let guard = InFlightGuard::enter(&self.in_flight);
        self.tasks.spawn(async move {
            let _guard = guard;
            let _permit = if needs_worker {
                match workers.acquire_owned().await {
                    Ok(p) => Some(p),
                    Err(_) => return,
                }
            } else {
                None
            };
            let Some(text) = classifier.respond(&msg, intent).await else {
                return;
            };
            let reply = OutboundReply {
                text,
                in_reply_to: msg.message_id.clone(),
            };
            if let Err(e) = sink.send_reply(&reply).await {
                log::warn!("reply to message {} not delivered: {}", msg.message_id, e);
            }
        });
    }

    fn reap_finished(&mut self) {
        while let Some(res) = self.tasks.try_join_next() {
            if let Err(e) = res {
                log::warn!("dispatch task failed: {}", e);
            }
        }
    }

    /// Wait up to `grace` for in-flight dispatches, then abort the rest (killing their processes).
    pub async fn drain(&mut self, grace: Duration) {
        let tasks = &mut self.tasks;
        let finished = tokio::time::timeout(grace, async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    log::warn!("dispatch task failed: {}", e);
                }
            }
        })
        .await;
        if finished.is_err() {
            log::warn!(
                "aborting {} in-flight dispatch(es) after {}s grace period",
                self.tasks.len(),
                grace.as_secs()
            );
            self.tasks.shutdown().await;
        }
    }

    /// Process events in delivery order until the source closes or `shutdown` flips, then drain.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
        grace: Duration,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(msg) => self.on_event(msg),
                    None => break,
                },
            }
        }
        events.close();
        self.drain(grace).await;
        log::info!("dispatcher stopped");
    }
}

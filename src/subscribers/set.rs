//! # Fan-out of run events to subscribers.
//!
//! [`SubscriberSet`] gives every subscriber its own bounded queue (a
//! *lane*) and a worker task that drains it. Publishing never waits:
//! [`SubscriberSet::emit_arc`] pushes the shared event into each lane with
//! `try_send` and returns, so one stuck observer can stall nothing but its
//! own view of the run.
//!
//! ## Where subscriber trouble goes
//!
//! Delivery failures are real information — a metrics or audit subscriber
//! needs to know its record has a hole — so a full lane or a panicking
//! handler produces a first-class [`Event`] ([`EventKind::SubscriberDropped`]
//! / [`EventKind::SubscriberPanicked`]). Those diagnostics are handed
//! straight to the *other* lanes instead of being republished on the bus:
//! the scheduler closes the bus at the end of the run to flush every queue
//! before the history file is written, and a bus sender parked inside this
//! type would keep the channel open forever. Workers reach their peers
//! through weak queue handles, so the report path never extends a lane's
//! lifetime either.
//!
//! Two deliberate limits on diagnostics:
//! - the subscriber that caused one never receives it (its lane is the
//!   problem), and
//! - diagnostics are never generated *about* diagnostics, so a saturated
//!   lane cannot feed itself. A diagnostic that cannot be delivered is
//!   only logged.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// One subscriber's inbox, held by the emitting side.
struct Lane {
    name: &'static str,
    feed: mpsc::Sender<Arc<Event>>,
}

/// How a worker reaches the other subscribers with its panic reports.
///
/// Weak on purpose: only the [`SubscriberSet`] keeps lanes alive, so
/// dropping it still closes every queue and lets the workers drain out.
#[derive(Clone)]
struct PeerHandle {
    feed: mpsc::WeakSender<Arc<Event>>,
}

impl PeerHandle {
    fn offer(&self, ev: &Arc<Event>) {
        if let Some(feed) = self.feed.upgrade() {
            // Best effort; a peer too busy for a diagnostic just misses it.
            let _ = feed.try_send(Arc::clone(ev));
        }
    }
}

/// Owns the lanes and workers of every registered subscriber.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    /// Builds the lanes and starts one worker per subscriber.
    ///
    /// All queues are created up front so each worker can be handed weak
    /// handles to every *other* lane for its panic reports.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let mut lanes = Vec::with_capacity(subs.len());
        let mut inboxes = Vec::with_capacity(subs.len());
        for sub in &subs {
            let (feed, inbox) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            lanes.push(Lane {
                name: sub.name(),
                feed,
            });
            inboxes.push(inbox);
        }

        let workers = subs
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(me, (sub, inbox))| {
                let peers: Vec<PeerHandle> = lanes
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != me)
                    .map(|(_, lane)| PeerHandle {
                        feed: lane.feed.downgrade(),
                    })
                    .collect();
                tokio::spawn(drain_lane(sub, inbox, peers))
            })
            .collect();

        Self { lanes, workers }
    }

    /// Hands one event to every lane without waiting.
    ///
    /// A lane that cannot take it (queue full, worker gone) misses the
    /// event; unless the event is itself a diagnostic, the miss is reported
    /// to the remaining lanes as a [`EventKind::SubscriberDropped`] event
    /// and logged.
    pub fn emit_arc(&self, ev: Arc<Event>) {
        for (me, lane) in self.lanes.iter().enumerate() {
            let reason = match lane.feed.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "queue full",
                Err(mpsc::error::TrySendError::Closed(_)) => "worker gone",
            };
            tracing::warn!(subscriber = lane.name, reason, "event not delivered");
            if !ev.kind.is_diagnostic() {
                let report = Arc::new(Event::subscriber_dropped(lane.name, reason));
                for (i, peer) in self.lanes.iter().enumerate() {
                    if i != me {
                        let _ = peer.feed.try_send(Arc::clone(&report));
                    }
                }
            }
        }
    }

    /// Closes every lane and waits for the workers to finish draining.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Worker loop of one subscriber: pull, handle, contain panics.
async fn drain_lane(
    sub: Arc<dyn Subscribe>,
    mut inbox: mpsc::Receiver<Arc<Event>>,
    peers: Vec<PeerHandle>,
) {
    while let Some(ev) = inbox.recv().await {
        let handled = std::panic::AssertUnwindSafe(sub.on_event(ev.as_ref()))
            .catch_unwind()
            .await;
        if let Err(payload) = handled {
            let info = panic_text(payload.as_ref());
            tracing::error!(subscriber = sub.name(), panic = %info, "subscriber panicked");
            let report = Arc::new(Event::subscriber_panicked(sub.name(), info));
            for peer in &peers {
                peer.offer(&report);
            }
        }
    }
}

/// Extracts the human-readable part of a panic payload, if it has one.
fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

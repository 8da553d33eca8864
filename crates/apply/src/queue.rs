//! Work queue in front of a [`Reconciler`]: coalesce triggers, run one at a time,
//! requeue failures after a delay.

use std::collections::VecDeque;
use std::time::Duration;

use metrics::counter;
use promtarget_core::ConfigId;
use promtarget_store::Backend;
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Reconciler;

const DRAIN_INTERVAL: Duration = Duration::from_millis(20);

/// FIFO of config ids, de-duplicated. Never drops an id: a trigger is not
/// re-sent, so the queue grows up to the number of distinct configs.
pub struct Coalescer {
    queued: FxHashSet<ConfigId>,
    order: VecDeque<ConfigId>,
}

impl Coalescer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { queued: FxHashSet::default(), order: VecDeque::with_capacity(cap) }
    }

    pub fn len(&self) -> usize { self.order.len() }
    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    /// Returns false when `id` was already waiting.
    pub fn push(&mut self, id: ConfigId) -> bool {
        if !self.queued.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        true
    }

    pub fn drain_ready(&mut self) -> Vec<ConfigId> {
        self.queued.clear();
        self.order.drain(..).collect()
    }
}

/// Spawn the reconcile loop. Returns the trigger sender and the task handle.
///
/// `cap` bounds the trigger channel, so senders wait while the worker is busy.
/// Dropping every sender drains what is queued and ends the task; pending
/// requeues are abandoned.
pub fn spawn_worker<B>(
    reconciler: Reconciler<B>,
    cap: usize,
    requeue: Duration,
) -> (mpsc::Sender<ConfigId>, JoinHandle<()>)
where
    B: Backend + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ConfigId>(cap.max(1));
    let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<ConfigId>();

    let handle = tokio::spawn(async move {
        let mut coalescer = Coalescer::with_capacity(cap);
        let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(id) => enqueue(&mut coalescer, id),
                        None => {
                            debug!("trigger channel closed; draining and exiting worker");
                            for id in coalescer.drain_ready() {
                                process(&reconciler, id, &retry_tx, requeue).await;
                            }
                            break;
                        }
                    }
                }
                Some(id) = retry_rx.recv() => enqueue(&mut coalescer, id),
                _ = ticker.tick() => {
                    for id in coalescer.drain_ready() {
                        process(&reconciler, id, &retry_tx, requeue).await;
                    }
                }
            }
        }
        info!("reconcile worker stopped");
    });

    (tx, handle)
}

fn enqueue(coalescer: &mut Coalescer, id: ConfigId) {
    if coalescer.push(id) {
        counter!("trigger_enqueued_total", 1u64);
    } else {
        counter!("trigger_coalesced_total", 1u64);
    }
}

async fn process<B: Backend>(
    reconciler: &Reconciler<B>,
    id: ConfigId,
    retry: &mpsc::UnboundedSender<ConfigId>,
    requeue: Duration,
) {
    match reconciler.reconcile(&id).await {
        Ok(outcome) => {
            debug!(config = %id, wrote = outcome.wrote_anything(), discovered = outcome.discovered.len(), "reconciled");
        }
        Err(e) if e.is_not_found() => debug!(config = %id, "config no longer exists; dropping"),
        Err(e) => {
            warn!(config = %id, error = %e, delay_ms = requeue.as_millis() as u64, "reconcile failed; requeueing");
            let tx = retry.clone();
            tokio::spawn(async move {
                tokio::time::sleep(requeue).await;
                let _ = tx.send(id);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promtarget_core::ObjectRef;

    fn id(n: &str) -> ConfigId {
        ObjectRef::new("default", n)
    }

    #[test]
    fn coalesces_duplicates_in_fifo_order() {
        let mut c = Coalescer::with_capacity(8);
        assert!(c.push(id("a")));
        assert!(c.push(id("b")));
        assert!(!c.push(id("a")));
        assert_eq!(c.len(), 2);
        assert_eq!(c.drain_ready(), vec![id("a"), id("b")]);
        assert!(c.is_empty());
        // drained ids can be queued again
        assert!(c.push(id("a")));
    }

    #[test]
    fn keeps_every_distinct_id_past_initial_capacity() {
        let mut c = Coalescer::with_capacity(2);
        for n in ["a", "b", "c", "d"] {
            assert!(c.push(id(n)));
        }
        assert!(!c.push(id("b")));
        assert_eq!(c.drain_ready(), vec![id("a"), id("b"), id("c"), id("d")]);
    }
}

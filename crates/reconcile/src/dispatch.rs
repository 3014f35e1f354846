use glk_core::Event;
use metrics::counter;
use tracing::{debug, info};

use crate::queue::DeferredQueue;
use crate::reconciler::{Outcome, Reconciler};

/// Event-at-a-time delivery with deferred redelivery after convergence.
pub struct Dispatcher {
    reconciler: Reconciler,
    deferred: DeferredQueue,
}

impl Dispatcher {
    pub fn new(reconciler: Reconciler, deferred: DeferredQueue) -> Self { Self { reconciler, deferred } }

    pub fn reconciler(&self) -> &Reconciler { &self.reconciler }
    pub fn deferred(&self) -> &DeferredQueue { &self.deferred }

    pub fn into_parts(self) -> (Reconciler, DeferredQueue) { (self.reconciler, self.deferred) }

    /// Run one event to completion, then redeliver whatever became ready.
    pub async fn dispatch(&mut self, event: Event) -> Outcome {
        let outcome = self.reconciler.handle(&event).await;
        if outcome == Outcome::Deferred {
            info!(event = event.name(), generation = self.reconciler.generation(), "event deferred");
            self.deferred.push(event, self.reconciler.generation());
        }
        self.redeliver().await;
        outcome
    }

    /// Redeliver events deferred before the current generation. Returns how many ran.
    pub async fn redeliver(&mut self) -> usize {
        let ready = self.deferred.drain_ready(self.reconciler.generation());
        let n = ready.len();
        for event in ready {
            counter!("reconcile_redelivered_total", 1u64);
            debug!(event = event.name(), "redelivering deferred event");
            if self.reconciler.handle(&event).await == Outcome::Deferred {
                self.deferred.push(event, self.reconciler.generation());
            }
        }
        n
    }
}

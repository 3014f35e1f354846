use std::collections::VecDeque;

use glk_core::{Deferred, Event};
use rustc_hash::FxHashMap;

/// FIFO of deferred events, coalesced by event.
///
/// An event is ready for redelivery only once the generation has moved past
/// the one it was deferred at, so a handler that keeps deferring cannot spin.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    map: FxHashMap<Event, u64>,
    order: VecDeque<Event>,
}

impl DeferredQueue {
    pub fn new() -> Self { Self::default() }

    pub fn from_entries(entries: impl IntoIterator<Item = Deferred>) -> Self {
        let mut q = Self::new();
        for d in entries {
            q.push(d.event, d.generation);
        }
        q
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }

    /// Re-deferring an already queued event keeps its place but takes the newer generation.
    pub fn push(&mut self, event: Event, generation: u64) {
        if !self.map.contains_key(&event) {
            self.order.push_back(event.clone());
        }
        self.map.insert(event, generation);
    }

    /// Remove and return, in order, every event deferred before `generation`.
    pub fn drain_ready(&mut self, generation: u64) -> Vec<Event> {
        let mut ready = Vec::new();
        let mut keep = VecDeque::with_capacity(self.order.len());
        while let Some(ev) = self.order.pop_front() {
            match self.map.get(&ev) {
                Some(g) if *g < generation => {
                    self.map.remove(&ev);
                    ready.push(ev);
                }
                Some(_) => keep.push_back(ev),
                None => {}
            }
        }
        self.order = keep;
        ready
    }

    pub fn entries(&self) -> Vec<Deferred> {
        self.order
            .iter()
            .filter_map(|ev| self.map.get(ev).map(|g| Deferred { event: ev.clone(), generation: *g }))
            .collect()
    }
}

//! Host event queue.
//!
//! The host records spawn/destroy notifications here in the order they
//! happen; the server drains them each tick and forwards them to the anchor
//! service. Handlers may cause further events (a cascaded kill), which land
//! at the back of the same queue and are handled in the same drain.

use std::collections::VecDeque;

use crate::ecs::EntityHandle;

/// Entity lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    EntitySpawned(EntityHandle),
    EntityDestroyed(EntityHandle),
    /// Periodic world save.
    ServerSave,
}

/// FIFO of pending host events.
#[derive(Debug, Default)]
pub struct EventQueue {
    queue: VecDeque<HostEvent>,
}

impl EventQueue {
    pub fn push(&mut self, e: HostEvent) {
        self.queue.push_back(e);
    }

    pub fn pop(&mut self) -> Option<HostEvent> {
        self.queue.pop_front()
    }

    /// Takes everything queued so far.
    pub fn drain(&mut self) -> Vec<HostEvent> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_order() {
        let mut q = EventQueue::default();
        q.push(HostEvent::EntitySpawned(EntityHandle(1)));
        q.push(HostEvent::EntityDestroyed(EntityHandle(1)));
        assert_eq!(q.pop(), Some(HostEvent::EntitySpawned(EntityHandle(1))));
        assert_eq!(q.drain(), vec![HostEvent::EntityDestroyed(EntityHandle(1))]);
        assert!(q.is_empty());
    }
}

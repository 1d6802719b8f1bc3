//! In-process lifecycle notifications.
//!
//! Scene management and telemetry collaborators subscribe here instead of
//! wiring delegates into individual components. Events are queued as they
//! happen and dispatched in order once per tick, so subscriber observation
//! order is deterministic regardless of which subsystem published first.

use std::collections::VecDeque;

use uuid::Uuid;

/// Stable identity of one vehicle instance across its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VehicleId(pub Uuid);

impl VehicleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VehicleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    VehicleSpawned {
        id: VehicleId,
    },
    VehicleDestroyed {
        id: VehicleId,
    },
    CollisionOccurred {
        id: VehicleId,
        /// World-space impulse magnitude of the reported contact (N*s).
        impulse: f32,
    },
    WheelDetached {
        id: VehicleId,
        wheel: usize,
    },
}

/// A subscriber to lifecycle events.
pub trait EventSink {
    fn on_event(&mut self, event: &LifecycleEvent);
}

impl<F: FnMut(&LifecycleEvent)> EventSink for F {
    fn on_event(&mut self, event: &LifecycleEvent) {
        self(event)
    }
}

/// Ordered event queue plus subscriber list.
#[derive(Default)]
pub struct EventHub {
    pending: VecDeque<LifecycleEvent>,
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Queue an event. Nothing is delivered until `dispatch`.
    pub fn publish(&mut self, event: LifecycleEvent) {
        self.pending.push_back(event);
    }

    /// Deliver all queued events to every subscriber, in publish order.
    /// Called once per tick by the owner of the hub.
    pub fn dispatch(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            for sink in &mut self.sinks {
                sink.on_event(&event);
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn dispatch_preserves_publish_order() {
        let seen: Rc<RefCell<Vec<LifecycleEvent>>> = Rc::default();
        let seen2 = Rc::clone(&seen);

        let mut hub = EventHub::new();
        hub.subscribe(Box::new(move |ev: &LifecycleEvent| {
            seen2.borrow_mut().push(ev.clone());
        }));

        let id = VehicleId::new();
        hub.publish(LifecycleEvent::VehicleSpawned { id });
        hub.publish(LifecycleEvent::CollisionOccurred { id, impulse: 4.0 });
        hub.publish(LifecycleEvent::VehicleDestroyed { id });
        assert_eq!(hub.pending_len(), 3);

        hub.dispatch();
        assert_eq!(hub.pending_len(), 0);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0], LifecycleEvent::VehicleSpawned { .. }));
        assert!(matches!(seen[2], LifecycleEvent::VehicleDestroyed { .. }));
    }

    #[test]
    fn dispatch_without_subscribers_drains_queue() {
        let mut hub = EventHub::new();
        hub.publish(LifecycleEvent::VehicleSpawned {
            id: VehicleId::new(),
        });
        hub.dispatch();
        assert_eq!(hub.pending_len(), 0);
    }
}

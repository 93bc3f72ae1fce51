//! # Event Dispatcher
//!
//! Readiness state machine plus the anti-recursion change-event fan-out.
//!
//! ## Design Principles
//!
//! 1. **Snapshots, not streams**: one fan-out builds its payload exactly
//!    once and every listener sees that same immutable event
//! 2. **Per-entity suppression**: a listener reacting to a change event may
//!    cause another change to the *same* entity; the per-entity guard bit in
//!    the registry turns that into a silent no-op instead of a storm.
//!    Events for *other* entities still go out, which is why fan-out
//!    traversal takes the listener lock recursively
//! 3. **Replay for late arrivals**: a readiness listener registered while
//!    the system is already ready is brought up to date synchronously,
//!    inside the registration call
//!
//! A listener must not (de)register listeners of either kind from within its
//! own invocation; doing so deadlocks rather than corrupting the lists.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use morphvault_core::{EntityId, EntityStateRegistry};

use crate::events::{
    ActorChangeListener, ChangeEvent, LifecycleSignal, Readiness, ReadinessListener,
};

/// Fans out change events and readiness transitions to subscribers.
pub struct EventDispatcher {
    registry: Arc<EntityStateRegistry>,
    change_listeners: RwLock<Vec<Arc<dyn ActorChangeListener>>>,
    readiness_listeners: RwLock<Vec<Arc<dyn ReadinessListener>>>,
    // Lock order: readiness mutex before either listener lock.
    readiness: Mutex<Readiness>,
}

impl EventDispatcher {
    /// Creates a dispatcher over the given registry, starting unready.
    #[must_use]
    pub fn new(registry: Arc<EntityStateRegistry>) -> Self {
        Self {
            registry,
            change_listeners: RwLock::new(Vec::new()),
            readiness_listeners: RwLock::new(Vec::new()),
            readiness: Mutex::new(Readiness::Unready),
        }
    }

    /// The current readiness state.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        *self.readiness.lock()
    }

    /// Routes a host lifecycle signal into the readiness machine.
    pub fn handle_lifecycle(&self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::DataLoaded
            | LifecycleSignal::SaveCompleted
            | LifecycleSignal::PostLoad => self.enter_ready(),
            LifecycleSignal::PreSave | LifecycleSignal::Revert => self.enter_unready(),
        }
    }

    /// Transitions to ready, fanning out `becoming_ready` then `ready`.
    /// A no-op when already ready.
    pub fn enter_ready(&self) {
        let mut state = self.readiness.lock();
        if *state == Readiness::Ready {
            return;
        }
        info!("entering ready state");
        *state = Readiness::BecomingReady;
        for listener in self.readiness_listeners.read_recursive().iter() {
            listener.becoming_ready();
        }
        *state = Readiness::Ready;
        for listener in self.readiness_listeners.read_recursive().iter() {
            listener.ready();
        }
    }

    /// Transitions to unready, fanning out `becoming_unready` then
    /// `no_longer_ready`. A no-op when already unready.
    pub fn enter_unready(&self) {
        let mut state = self.readiness.lock();
        if *state == Readiness::Unready {
            return;
        }
        info!("leaving ready state");
        *state = Readiness::BecomingUnready;
        for listener in self.readiness_listeners.read_recursive().iter() {
            listener.becoming_unready();
        }
        *state = Readiness::Unready;
        for listener in self.readiness_listeners.read_recursive().iter() {
            listener.no_longer_ready();
        }
    }

    /// Subscribes a readiness listener.
    ///
    /// If the system is already ready, the listener's `becoming_ready` and
    /// `ready` are replayed synchronously before this returns.
    pub fn register_readiness_listener(&self, listener: Arc<dyn ReadinessListener>) {
        let state = self.readiness.lock();
        self.readiness_listeners.write().push(Arc::clone(&listener));
        if *state == Readiness::Ready {
            debug!("replaying readiness to a late listener");
            listener.becoming_ready();
            listener.ready();
        }
    }

    /// Unsubscribes a readiness listener. Returns whether it was subscribed.
    pub fn deregister_readiness_listener(&self, listener: &Arc<dyn ReadinessListener>) -> bool {
        let _state = self.readiness.lock();
        let mut listeners = self.readiness_listeners.write();
        let before = listeners.len();
        listeners.retain(|candidate| !Arc::ptr_eq(candidate, listener));
        listeners.len() != before
    }

    /// Subscribes a change listener. Delivery order is registration order.
    pub fn register_change_listener(&self, listener: Arc<dyn ActorChangeListener>) {
        self.change_listeners.write().push(listener);
    }

    /// Unsubscribes a change listener. Returns whether it was subscribed.
    pub fn deregister_change_listener(&self, listener: &Arc<dyn ActorChangeListener>) -> bool {
        let mut listeners = self.change_listeners.write();
        let before = listeners.len();
        listeners.retain(|candidate| !Arc::ptr_eq(candidate, listener));
        listeners.len() != before
    }

    /// Whether anyone is subscribed to change events.
    #[must_use]
    pub fn has_change_listeners(&self) -> bool {
        !self.change_listeners.read_recursive().is_empty()
    }

    /// Fans out a change event for `entity`.
    ///
    /// `build` is called at most once, and only after the cheap exits: no
    /// subscribers, or a fan-out for this entity already on the stack (the
    /// re-entrancy guard). Suppression is silent; the outer fan-out owns the
    /// guard and clears it when it unwinds.
    pub fn send_actor_change<F>(&self, entity: EntityId, build: F)
    where
        F: FnOnce() -> ChangeEvent,
    {
        let listeners = self.change_listeners.read_recursive();
        if listeners.is_empty() {
            return;
        }
        if self.registry.try_enter_change_guard(entity) {
            debug!(entity, "suppressed re-entrant change event");
            return;
        }
        // Clears the guard even if a listener panics and unwinds through us;
        // a wedged guard would suppress every later event for the entity.
        let _exit = GuardExit {
            registry: &self.registry,
            entity,
        };
        let event = build();
        for listener in listeners.iter() {
            listener.on_actor_change(entity, &event);
        }
    }
}

struct GuardExit<'a> {
    registry: &'a EntityStateRegistry,
    entity: EntityId,
}

impl Drop for GuardExit<'_> {
    fn drop(&mut self) {
        self.registry.exit_change_guard(self.entity);
    }
}

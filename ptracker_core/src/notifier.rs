//! Ordered notifier bus
//!
//! Subscribers register with a priority and receive every dispatched event on
//! the dispatching thread, highest priority first. Equal priorities keep
//! registration order. A subscriber can stop propagation of a single event.

use crate::error::{PtrackerError, PtrackerResult};
use crate::types::{Reason, SceneEvent};
use log::{debug, trace};
use parking_lot::RwLock;
use std::sync::Arc;

/// Result of one handler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Continue,
    /// Do not deliver this event to the remaining handlers
    Stop,
}

/// A bus subscriber.
pub trait Notifier<C: ?Sized>: Send + Sync {
    /// Name used in log output
    fn name(&self) -> &str;

    fn notify(&self, reason: Reason, ctx: &C) -> NotifyOutcome;
}

/// Contract for policy consumers reacting to scene transitions.
///
/// Both callbacks run on the classifier worker and must not block.
pub trait SceneObserver: Send + Sync {
    fn name(&self) -> &str;

    /// Apply the policy of the new scene (`event.dst`).
    fn on_scene_change(&self, event: &SceneEvent) -> NotifyOutcome;

    /// Quiesce the policy of the scene being left.
    fn on_scene_change_prepare(&self, event: &SceneEvent) -> NotifyOutcome;
}

/// Route a bus event to the matching [`SceneObserver`] callback. Other reasons
/// are ignored.
pub fn route_scene_event<O: SceneObserver + ?Sized>(
    observer: &O,
    reason: Reason,
    event: &SceneEvent,
) -> NotifyOutcome {
    match reason {
        Reason::SceneChange => observer.on_scene_change(event),
        Reason::SceneChangePrepare => observer.on_scene_change_prepare(event),
        _ => NotifyOutcome::Continue,
    }
}

/// Bus handler wrapping any [`SceneObserver`].
pub struct ObserverHandler<O: ?Sized>(pub Arc<O>);

impl<O: SceneObserver + ?Sized> Notifier<SceneEvent> for ObserverHandler<O> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn notify(&self, reason: Reason, event: &SceneEvent) -> NotifyOutcome {
        route_scene_event(self.0.as_ref(), reason, event)
    }
}

struct Subscriber<C: ?Sized> {
    priority: i32,
    handler: Arc<dyn Notifier<C>>,
}

/// Ordered subscriber list with synchronous dispatch.
pub struct NotifierBus<C: ?Sized = SceneEvent> {
    subscribers: RwLock<Vec<Subscriber<C>>>,
}

fn same_handler<C: ?Sized>(a: &Arc<dyn Notifier<C>>, b: &Arc<dyn Notifier<C>>) -> bool {
    // Compare data pointers only; vtable pointers are not unique.
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl<C: ?Sized> NotifierBus<C> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Insert `handler` after every subscriber with priority >= `priority`.
    pub fn register(&self, handler: Arc<dyn Notifier<C>>, priority: i32) -> PtrackerResult<()> {
        let mut subscribers = self.subscribers.write();
        if subscribers.iter().any(|s| same_handler(&s.handler, &handler)) {
            return Err(PtrackerError::AlreadyRegistered(handler.name().to_string()));
        }

        let pos = subscribers
            .iter()
            .position(|s| s.priority < priority)
            .unwrap_or(subscribers.len());
        debug!(
            "[Notifier] Registered '{}' (priority {}, slot {})",
            handler.name(),
            priority,
            pos
        );
        subscribers.insert(pos, Subscriber { priority, handler });
        Ok(())
    }

    /// Remove `handler`. Returns false if it was not registered.
    pub fn unregister(&self, handler: &Arc<dyn Notifier<C>>) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| !same_handler(&s.handler, handler));
        let removed = subscribers.len() != before;
        if removed {
            debug!("[Notifier] Unregistered '{}'", handler.name());
        }
        removed
    }

    /// Deliver `reason` to every subscriber in order.
    ///
    /// Handlers run without the bus lock held. Returns `Stop` if a handler
    /// stopped propagation, `Continue` otherwise.
    pub fn dispatch(&self, reason: Reason, ctx: &C) -> NotifyOutcome {
        let handlers: Vec<Arc<dyn Notifier<C>>> = self
            .subscribers
            .read()
            .iter()
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            if handler.notify(reason, ctx) == NotifyOutcome::Stop {
                trace!(
                    "[Notifier] '{}' stopped propagation of {}",
                    handler.name(),
                    reason
                );
                return NotifyOutcome::Stop;
            }
        }
        NotifyOutcome::Continue
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscriber names in dispatch order
    pub fn names(&self) -> Vec<String> {
        self.subscribers
            .read()
            .iter()
            .map(|s| s.handler.name().to_string())
            .collect()
    }
}

impl<C: ?Sized> Default for NotifierBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        outcome: NotifyOutcome,
    }

    impl Recorder {
        fn arc(name: &str, log: &Arc<Mutex<Vec<String>>>, outcome: NotifyOutcome) -> Arc<dyn Notifier<u32>> {
            Arc::new(Self {
                name: name.to_string(),
                log: Arc::clone(log),
                outcome,
            })
        }
    }

    impl Notifier<u32> for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn notify(&self, reason: Reason, ctx: &u32) -> NotifyOutcome {
            self.log.lock().push(format!("{}:{}:{}", self.name, reason.label(), ctx));
            self.outcome
        }
    }

    #[test]
    fn test_dispatch_in_priority_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = NotifierBus::<u32>::new();
        bus.register(Recorder::arc("low", &log, NotifyOutcome::Continue), -5).unwrap();
        bus.register(Recorder::arc("high", &log, NotifyOutcome::Continue), 10).unwrap();
        bus.register(Recorder::arc("mid_a", &log, NotifyOutcome::Continue), 0).unwrap();
        bus.register(Recorder::arc("mid_b", &log, NotifyOutcome::Continue), 0).unwrap();

        assert_eq!(bus.names(), vec!["high", "mid_a", "mid_b", "low"]);
        assert_eq!(bus.dispatch(Reason::ThroughputSample, &7), NotifyOutcome::Continue);
        assert_eq!(
            *log.lock(),
            vec!["high:tp:7", "mid_a:tp:7", "mid_b:tp:7", "low:tp:7"]
        );
    }

    #[test]
    fn test_stop_ends_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = NotifierBus::<u32>::new();
        bus.register(Recorder::arc("first", &log, NotifyOutcome::Stop), 1).unwrap();
        bus.register(Recorder::arc("second", &log, NotifyOutcome::Continue), 0).unwrap();

        assert_eq!(bus.dispatch(Reason::Suspend, &1), NotifyOutcome::Stop);
        assert_eq!(*log.lock(), vec!["first:suspend:1"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = NotifierBus::<u32>::new();
        let handler = Recorder::arc("dup", &log, NotifyOutcome::Continue);
        bus.register(Arc::clone(&handler), 0).unwrap();
        assert!(matches!(
            bus.register(Arc::clone(&handler), 3),
            Err(PtrackerError::AlreadyRegistered(_))
        ));
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = NotifierBus::<u32>::new();
        let handler = Recorder::arc("gone", &log, NotifyOutcome::Continue);
        bus.register(Arc::clone(&handler), 0).unwrap();

        assert!(bus.unregister(&handler));
        assert!(!bus.unregister(&handler));
        assert!(bus.is_empty());
        assert_eq!(bus.dispatch(Reason::ThroughputSample, &0), NotifyOutcome::Continue);
        assert!(log.lock().is_empty());
    }

    struct Observer {
        calls: Mutex<Vec<(Reason, SceneEvent)>>,
    }

    impl SceneObserver for Observer {
        fn name(&self) -> &str {
            "observer"
        }

        fn on_scene_change(&self, event: &SceneEvent) -> NotifyOutcome {
            self.calls.lock().push((Reason::SceneChange, *event));
            NotifyOutcome::Continue
        }

        fn on_scene_change_prepare(&self, event: &SceneEvent) -> NotifyOutcome {
            self.calls.lock().push((Reason::SceneChangePrepare, *event));
            NotifyOutcome::Continue
        }
    }

    #[test]
    fn test_observer_handler_routes_scene_events() {
        let observer = Arc::new(Observer {
            calls: Mutex::new(Vec::new()),
        });
        let bus = NotifierBus::<SceneEvent>::new();
        bus.register(Arc::new(ObserverHandler(Arc::clone(&observer))), 0)
            .unwrap();

        let event = SceneEvent::default();
        bus.dispatch(Reason::ThroughputSample, &event);
        bus.dispatch(Reason::SceneChangePrepare, &event);
        bus.dispatch(Reason::SceneChange, &event);

        let calls = observer.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, Reason::SceneChangePrepare);
        assert_eq!(calls[1].0, Reason::SceneChange);
    }
}

use crate::domain_port::SessionInvalidationSink;
use crate::logger::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub type InvalidationHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

#[derive(Default)]
struct Registry {
    primary: Option<InvalidationHandler>,
    subscribers: Vec<(SubscriptionId, InvalidationHandler)>,
}

/// Fans a session invalidation out to the app.
#[derive(Default)]
pub struct InvalidationHub {
    registry: Mutex<Registry>,
}

impl InvalidationHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.registry().primary = Some(Arc::new(handler));
    }

    pub fn clear_handler(&self) {
        self.registry().primary = None;
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.registry().subscribers.push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let before = registry.subscribers.len();
        registry.subscribers.retain(|(existing, _)| *existing != id);
        registry.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        let registry = self.registry();
        registry.subscribers.len() + usize::from(registry.primary.is_some())
    }
}

impl SessionInvalidationSink for InvalidationHub {
    fn session_invalidated(&self) {
        // handlers run outside the lock so they may (un)register
        let handlers: Vec<InvalidationHandler> = {
            let registry = self.registry();
            registry
                .primary
                .iter()
                .cloned()
                .chain(registry.subscribers.iter().map(|(_, h)| h.clone()))
                .collect()
        };
        warn!(handlers = handlers.len(), "session invalidated");
        for handler in handlers {
            handler();
        }
    }
}

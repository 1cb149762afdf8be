//! Hot-swap indirection slot

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::{Next, Request, RequestHandler, Response};

struct Assigned(Arc<dyn RequestHandler>);

/// A stable pipeline entry whose target can be replaced at any time
///
/// [`HotSwapSlot::assign`] is a single atomic pointer swap: a request in
/// flight keeps the handler it started with, and a request arriving during a
/// swap sees either the old or the new handler. An empty slot passes
/// requests straight to `next`.
#[derive(Default)]
pub struct HotSwapSlot {
    current: ArcSwapOption<Assigned>,
}

impl HotSwapSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot that already points at a handler
    #[must_use]
    pub fn with_handler(handler: Arc<dyn RequestHandler>) -> Self {
        let slot = Self::new();
        slot.assign(handler);
        slot
    }

    /// Point the slot at a new handler
    pub fn assign(&self, handler: Arc<dyn RequestHandler>) {
        self.current.store(Some(Arc::new(Assigned(handler))));
    }

    /// Empty the slot
    pub fn clear(&self) {
        self.current.store(None);
    }

    #[must_use]
    pub fn is_assigned(&self) -> bool {
        self.current.load().is_some()
    }

    /// Current handler, if any
    #[must_use]
    pub fn handler(&self) -> Option<Arc<dyn RequestHandler>> {
        self.current
            .load_full()
            .map(|assigned| Arc::clone(&assigned.0))
    }

    /// Forward a request to the current handler, or to `next` when empty
    pub async fn forward(&self, request: Request, next: Next) -> Response {
        match self.handler() {
            Some(handler) => handler.handle(request, next).await,
            None => next.run(request).await,
        }
    }
}

impl std::fmt::Debug for HotSwapSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotSwapSlot")
            .field("assigned", &self.is_assigned())
            .finish()
    }
}

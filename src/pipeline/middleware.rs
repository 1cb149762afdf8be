//! Ordered middleware chain

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::Serialize;

use super::{Next, Request, RequestHandler, Response};

struct Entry {
    name: String,
    order: i64,
    handler: Arc<dyn RequestHandler>,
}

/// Name and position of an installed middleware
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MiddlewareInfo {
    pub name: String,
    pub order: i64,
}

/// Middleware handlers run in ascending `order`
///
/// Entries with equal order keep their insertion order. The chain itself is
/// a [`RequestHandler`] and is mounted once at the pipeline root; edits only
/// republish the composed handler list.
#[derive(Default)]
pub struct MiddlewareChain {
    entries: Mutex<Vec<Entry>>,
    composed: ArcSwap<Vec<Arc<dyn RequestHandler>>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a middleware by name
    ///
    /// A replaced entry is removed first, then the handler is inserted before
    /// the first entry with a strictly greater order.
    pub fn insert(&self, name: &str, order: i64, handler: Arc<dyn RequestHandler>) {
        let mut entries = self.lock();
        entries.retain(|entry| entry.name != name);
        let index = entries
            .iter()
            .position(|entry| entry.order > order)
            .unwrap_or(entries.len());
        entries.insert(
            index,
            Entry {
                name: name.to_string(),
                order,
                handler,
            },
        );
        self.publish(&entries);
    }

    /// Remove a middleware by name, returning true if it was installed
    pub fn remove(&self, name: &str) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|entry| entry.name != name);
        let removed = entries.len() != before;
        if removed {
            self.publish(&entries);
        }
        removed
    }

    /// Installed middleware in execution order
    #[must_use]
    pub fn entries(&self) -> Vec<MiddlewareInfo> {
        self.lock()
            .iter()
            .map(|entry| MiddlewareInfo {
                name: entry.name.clone(),
                order: entry.order,
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.composed.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, entries: &[Entry]) {
        let handlers = entries
            .iter()
            .map(|entry| Arc::clone(&entry.handler))
            .collect();
        self.composed.store(Arc::new(handlers));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RequestHandler for MiddlewareChain {
    async fn handle(&self, request: Request, next: Next) -> Response {
        let handlers = self.composed.load_full();

        // Wrap from the back so the lowest order ends up outermost
        let chain = handlers.iter().rev().fold(next, |next, handler| {
            let handler = Arc::clone(handler);
            Next::new(move |request| async move { handler.handle(request, next).await })
        });

        chain.run(request).await
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("entries", &self.entries())
            .finish()
    }
}

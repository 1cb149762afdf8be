//! Hot-swap request layer
//!
//! The [`Pipeline`] is mounted once as the HTTP router fallback and never
//! rebuilt. Loaders mount [`HotSwapSlot`]s into it by owner key and later
//! re-point those slots, so a reload never changes the pipeline's shape.

pub mod middleware;
pub mod slot;

pub use middleware::{MiddlewareChain, MiddlewareInfo};
pub use slot::HotSwapSlot;

use std::future::Future;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::future::BoxFuture;
use serde::Serialize;

/// Request type flowing through the pipeline
pub type Request = axum::extract::Request;

/// Response type produced by the pipeline
pub type Response = axum::response::Response;

/// Body of the response when no handler claims a request
pub const NOT_FOUND_MESSAGE: &str = "handler not found";

/// Something that can answer or pass on a request
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle a request, or call `next` to pass it down the pipeline
    async fn handle(&self, request: Request, next: Next) -> Response;
}

/// Continuation to the rest of the pipeline
pub struct Next(Box<dyn FnOnce(Request) -> BoxFuture<'static, Response> + Send>);

impl Next {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Request) -> Fut + Send + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self(Box::new(move |request| Box::pin(f(request))))
    }

    /// Terminal continuation answering 404
    #[must_use]
    pub fn not_found() -> Self {
        Self::new(|_| async { not_found() })
    }

    /// Pass the request on
    pub fn run(self, request: Request) -> BoxFuture<'static, Response> {
        (self.0)(request)
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Next")
    }
}

/// The 404 returned when nothing handles a request
#[must_use]
pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE).into_response()
}

/// Whether a request path falls under a mount path
#[must_use]
pub fn path_matches(mount: &str, path: &str) -> bool {
    if mount == "/" || mount == path {
        return true;
    }
    path.strip_prefix(mount)
        .is_some_and(|rest| mount.ends_with('/') || rest.starts_with('/'))
}

#[derive(Clone)]
struct Mount {
    owner: String,
    path: String,
    slot: Arc<HotSwapSlot>,
}

/// Mount listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountInfo {
    pub owner: String,
    pub path: String,
    pub assigned: bool,
}

/// Ordered list of mounted slots
///
/// Reads take a snapshot of the mount list without locking; writers
/// serialize on a mutex and publish a new list.
#[derive(Default)]
pub struct Pipeline {
    mounts: ArcSwap<Vec<Mount>>,
    writer: Mutex<()>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `owner`'s slot at `handler`, mounting it at `path` if needed
    ///
    /// With an unchanged path the existing slot is re-pointed in place. A
    /// different path removes the old mount and appends a new one, so the
    /// old path stops answering.
    pub fn mount(
        &self,
        owner: &str,
        path: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Arc<HotSwapSlot> {
        let _guard = self.lock();
        let current = self.mounts.load_full();

        if let Some(existing) = current.iter().find(|m| m.owner == owner && m.path == path) {
            existing.slot.assign(handler);
            return Arc::clone(&existing.slot);
        }

        let slot = Arc::new(HotSwapSlot::with_handler(handler));
        let mut next: Vec<Mount> = current.iter().filter(|m| m.owner != owner).cloned().collect();
        if next.len() != current.len() {
            tracing::debug!(owner, path, "mount path changed, remounting");
        }
        next.push(Mount {
            owner: owner.to_string(),
            path: path.to_string(),
            slot: Arc::clone(&slot),
        });
        self.mounts.store(Arc::new(next));
        slot
    }

    /// Remove `owner`'s mount, returning true if one existed
    pub fn unmount(&self, owner: &str) -> bool {
        let _guard = self.lock();
        let current = self.mounts.load_full();
        let next: Vec<Mount> = current.iter().filter(|m| m.owner != owner).cloned().collect();
        let removed = next.len() != current.len();
        if removed {
            self.mounts.store(Arc::new(next));
        }
        removed
    }

    /// Slot mounted by `owner`
    #[must_use]
    pub fn slot(&self, owner: &str) -> Option<Arc<HotSwapSlot>> {
        self.mounts
            .load()
            .iter()
            .find(|m| m.owner == owner)
            .map(|m| Arc::clone(&m.slot))
    }

    /// Current mounts in dispatch order
    #[must_use]
    pub fn mounts(&self) -> Vec<MountInfo> {
        self.mounts
            .load()
            .iter()
            .map(|m| MountInfo {
                owner: m.owner.clone(),
                path: m.path.clone(),
                assigned: m.slot.is_assigned(),
            })
            .collect()
    }

    /// Run a request through every matching mount in order
    pub fn dispatch(&self, request: Request) -> BoxFuture<'static, Response> {
        run_from(self.mounts.load_full(), 0, request)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("mounts", &self.mounts())
            .finish()
    }
}

fn run_from(mounts: Arc<Vec<Mount>>, start: usize, request: Request) -> BoxFuture<'static, Response> {
    let path = request.uri().path();
    let found = mounts
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, m)| path_matches(&m.path, path))
        .map(|(index, m)| (index, Arc::clone(&m.slot)));

    match found {
        Some((index, slot)) => {
            let next = Next::new(move |request| run_from(mounts, index + 1, request));
            Box::pin(async move { slot.forward(request, next).await })
        }
        None => Box::pin(async { not_found() }),
    }
}

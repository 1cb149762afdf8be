//! Host wiring: scanner, packages, registry and the live pipeline
//!
//! ```text
//! Scanner ──Added/Removed──▶ Package ──Ready/Removed/Error──▶ dispatcher ──▶ Registry
//!    │                          ▲                                              │
//!    └──────────Updated─────────┘                                   Loader ◀───┘
//!                                                                      │
//!                                                  Pipeline / MiddlewareChain
//! ```
//!
//! Package events from every package go through one channel and are applied
//! by a single dispatcher task, in emission order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::Result;
use crate::config::HostConfig;
use crate::loader::reference_loaders;
use crate::package::{BuildQueue, Package, PackageEvent, PackageSettings};
use crate::pipeline::{MiddlewareChain, Pipeline, RequestHandler};
use crate::plugin::{BootstrapResolver, ExportTable};
use crate::registry::Registry;
use crate::scanner::{ScanEvent, Scanner, ScannerConfig};

/// Owner key of the middleware chain's root mount
const MIDDLEWARE_MOUNT: &str = "middleware";

enum Dispatch {
    Package(PackageEvent),
    Flush(oneshot::Sender<()>),
}

/// State shared with scanner callbacks
struct Shared {
    settings: PackageSettings,
    packages: Mutex<HashMap<PathBuf, Arc<Package>>>,
    builds: Mutex<Vec<JoinHandle<()>>>,
    dispatch: mpsc::UnboundedSender<Dispatch>,
}

impl Shared {
    fn packages(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<Package>>> {
        self.packages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and track a package; its events feed the dispatcher
    fn track(&self, path: &Path) -> Arc<Package> {
        let package = Package::new(path.to_path_buf(), self.settings.clone());
        let tx = self.dispatch.clone();
        package.events().subscribe(move |event: &PackageEvent| {
            let _ = tx.send(Dispatch::Package(event.clone()));
        });

        let previous = self.packages().insert(path.to_path_buf(), Arc::clone(&package));
        if let Some(previous) = previous {
            previous.remove();
        }
        package
    }

    fn untrack(&self, path: &Path) -> bool {
        let package = self.packages().remove(path);
        package.map(|package| package.remove()).is_some()
    }

    fn on_scan(&self, event: &ScanEvent) {
        match event {
            ScanEvent::Added(path) => {
                let package = self.track(path);
                let build = tokio::spawn(async move { package.build().await });
                let mut builds = lock(&self.builds);
                builds.retain(|handle| !handle.is_finished());
                builds.push(build);
            }
            ScanEvent::Removed(path) => {
                self.untrack(path);
            }
            // Packages subscribe to their own updates
            ScanEvent::Updated(_) => {}
        }
    }
}

/// Builder for [`PluginHost`]
pub struct PluginHostBuilder {
    config: HostConfig,
    resolver: Option<Arc<dyn BootstrapResolver>>,
    build_queue: Option<Arc<dyn BuildQueue>>,
}

impl PluginHostBuilder {
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            resolver: None,
            build_queue: None,
        }
    }

    /// Bootstrap resolver (defaults to [`ExportTable::with_builtins`])
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn BootstrapResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Build collaborator run before a package reports ready
    #[must_use]
    pub fn build_queue(mut self, queue: Arc<dyn BuildQueue>) -> Self {
        self.build_queue = Some(queue);
        self
    }

    #[must_use]
    pub fn build(self) -> PluginHost {
        let resolver: Arc<dyn BootstrapResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(ExportTable::with_builtins()),
        };
        let registry = Registry::new(resolver, self.config.overrides.clone());

        let pipeline = Arc::new(Pipeline::new());
        let middleware = Arc::new(MiddlewareChain::new());
        pipeline.mount(
            MIDDLEWARE_MOUNT,
            "/",
            Arc::clone(&middleware) as Arc<dyn RequestHandler>,
        );

        let scanner = Scanner::new(ScannerConfig::from(&self.config));
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            settings: PackageSettings {
                manifest_file: self.config.manifest_file.clone(),
                namespace: self.config.namespace.clone(),
                ignored: self.config.ignored_plugins.clone(),
                build_queue: self.build_queue,
                updates: Some(Arc::clone(scanner.events())),
            },
            packages: Mutex::new(HashMap::new()),
            builds: Mutex::new(Vec::new()),
            dispatch: tx,
        });

        PluginHost {
            config: self.config,
            registry,
            pipeline,
            middleware,
            scanner,
            shared,
            receiver: Mutex::new(Some(rx)),
            dispatcher: Mutex::new(None),
        }
    }
}

/// The running plugin host
pub struct PluginHost {
    config: HostConfig,
    registry: Registry,
    pipeline: Arc<Pipeline>,
    middleware: Arc<MiddlewareChain>,
    scanner: Scanner,
    shared: Arc<Shared>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Dispatch>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PluginHost {
    /// Host with the default resolver and no build step
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        PluginHostBuilder::new(config).build()
    }

    #[must_use]
    pub fn builder(config: HostConfig) -> PluginHostBuilder {
        PluginHostBuilder::new(config)
    }

    #[must_use]
    pub const fn config(&self) -> &HostConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub const fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    #[must_use]
    pub const fn middleware(&self) -> &Arc<MiddlewareChain> {
        &self.middleware
    }

    #[must_use]
    pub const fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Install the reference loaders and start the dispatcher
    ///
    /// Safe to call more than once; later calls do nothing. Does not scan.
    pub async fn init(&self) {
        let receiver = lock(&self.receiver).take();
        let Some(mut rx) = receiver else {
            return;
        };

        for (plugin_type, loader) in reference_loaders(&self.pipeline, &self.middleware) {
            self.registry.register_loader(plugin_type, loader).await;
        }

        let registry = self.registry.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Dispatch::Package(event) => registry.handle_package_event(&event).await,
                    Dispatch::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        *lock(&self.dispatcher) = Some(handle);
    }

    /// Initialize, then scan the roots and start watching
    ///
    /// # Errors
    ///
    /// Returns error if a watched root cannot be watched
    pub async fn start(&self) -> Result<()> {
        self.init().await;

        let shared = Arc::clone(&self.shared);
        self.scanner
            .events()
            .subscribe(move |event: &ScanEvent| shared.on_scan(event));

        self.scanner.start().await?;
        tracing::info!(
            roots = self.config.roots.len(),
            packages = self.scanner.known_paths().len(),
            "plugin host started"
        );
        Ok(())
    }

    /// Track a package folder and run its first build to completion
    ///
    /// The scanner does this on its own for discovered folders; this entry
    /// point serves embedders and tests that manage folders themselves.
    pub async fn add_package(&self, path: &Path) -> Arc<Package> {
        let package = self.shared.track(path);
        package.build().await;
        self.flush().await;
        package
    }

    /// Retire a tracked package and unload its plugins
    pub async fn remove_package(&self, path: &Path) -> bool {
        let removed = self.shared.untrack(path);
        self.flush().await;
        removed
    }

    /// Tracked package by folder
    #[must_use]
    pub fn package(&self, path: &Path) -> Option<Arc<Package>> {
        self.shared.packages().get(path).cloned()
    }

    /// Wait for in-flight scanner-started builds, then flush
    ///
    /// After [`PluginHost::start`] this leaves every initially discovered
    /// package built and applied to the registry.
    pub async fn settle(&self) {
        let builds: Vec<JoinHandle<()>> = lock(&self.shared.builds).drain(..).collect();
        for build in builds {
            if let Err(e) = build.await {
                tracing::warn!(error = %e, "package build task failed");
            }
        }
        self.flush().await;
    }

    /// Wait until every package event sent so far has been applied
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.shared.dispatch.send(Dispatch::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Stop watching, unload every package and stop the dispatcher
    pub async fn shutdown(&self) {
        self.scanner.stop();
        for build in lock(&self.shared.builds).drain(..) {
            build.abort();
        }

        let packages: Vec<Arc<Package>> = self
            .shared
            .packages()
            .drain()
            .map(|(_, package)| package)
            .collect();
        for package in &packages {
            package.remove();
        }
        self.flush().await;

        if let Some(handle) = lock(&self.dispatcher).take() {
            handle.abort();
        }
        tracing::info!(packages = packages.len(), "plugin host stopped");
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("registry", &self.registry)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Packages: one discovered folder and its plugin definitions
//!
//! A [`Package`] owns the lifecycle from discovery to a validated set of
//! [`PluginDefinition`]s. Every build cycle ends in exactly one
//! [`PackageEvent`], and update notifications are paused while a cycle runs
//! so two builds never overlap for the same path.

pub mod build;
pub mod definition;
pub mod manifest;

pub use build::{BuildFinished, BuildQueue, BuildRequest, ScriptBuildQueue};
pub use definition::{DefinitionDiff, PluginDefinition, normalize_definitions};
pub use manifest::PackageManifest;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio::sync::oneshot;

use crate::events::{Publisher, SubscriptionId};
use crate::scanner::ScanEvent;
use crate::{Error, Result};

/// Package lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    Pending,
    Building,
    Ready,
    Error,
}

/// Events emitted by a package
#[derive(Debug, Clone)]
pub enum PackageEvent {
    /// A build cycle succeeded
    Ready {
        diff: DefinitionDiff,
        package: Arc<Package>,
    },
    /// The package was removed; `diff.removed` holds every known definition
    Removed {
        diff: DefinitionDiff,
        package: Arc<Package>,
    },
    /// A build cycle failed
    Error {
        message: String,
        package: Arc<Package>,
    },
}

impl PackageEvent {
    /// Package that emitted the event
    #[must_use]
    pub fn package(&self) -> &Arc<Package> {
        match self {
            Self::Ready { package, .. } | Self::Removed { package, .. } | Self::Error { package, .. } => {
                package
            }
        }
    }
}

/// Settings shared by every package of a host
#[derive(Clone, Default)]
pub struct PackageSettings {
    /// Manifest file name at the package root
    pub manifest_file: String,
    /// Manifest key that holds the plugin list
    pub namespace: String,
    /// Plugin names filtered out of every package
    pub ignored: Vec<String>,
    /// Optional build collaborator
    pub build_queue: Option<Arc<dyn BuildQueue>>,
    /// Source of `Updated` notifications
    pub updates: Option<Arc<Publisher<ScanEvent>>>,
}

impl std::fmt::Debug for PackageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageSettings")
            .field("manifest_file", &self.manifest_file)
            .field("namespace", &self.namespace)
            .field("ignored", &self.ignored)
            .field("build_queue", &self.build_queue.is_some())
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of a package
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub path: PathBuf,
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    pub plugin_definitions: Vec<Arc<PluginDefinition>>,
    pub status: PackageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug)]
struct PackageState {
    info: PackageInfo,
    update_subscription: Option<SubscriptionId>,
    removed: bool,
}

/// One discovered package
pub struct Package {
    path: PathBuf,
    settings: PackageSettings,
    state: Mutex<PackageState>,
    events: Publisher<PackageEvent>,
    weak_self: Weak<Self>,
}

impl Package {
    /// Create a package in `pending` state
    ///
    /// Call [`Package::build`] to run the first cycle.
    #[must_use]
    pub fn new(path: PathBuf, settings: PackageSettings) -> Arc<Self> {
        let fallback_name = folder_name(&path);
        Arc::new_cyclic(|weak_self| Self {
            state: Mutex::new(PackageState {
                info: PackageInfo {
                    path: path.clone(),
                    name: fallback_name,
                    version: String::new(),
                    description: String::new(),
                    homepage: None,
                    author: None,
                    license: None,
                    plugin_definitions: Vec::new(),
                    status: PackageStatus::Pending,
                    error_message: None,
                },
                update_subscription: None,
                removed: false,
            }),
            path,
            settings,
            events: Publisher::new(),
            weak_self: weak_self.clone(),
        })
    }

    /// Package folder, the identity key
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Event channel for this package
    #[must_use]
    pub const fn events(&self) -> &Publisher<PackageEvent> {
        &self.events
    }

    /// Current snapshot
    #[must_use]
    pub fn info(&self) -> PackageInfo {
        self.lock().info.clone()
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> PackageStatus {
        self.lock().info.status
    }

    /// Package name from the manifest (folder name until the first build)
    #[must_use]
    pub fn name(&self) -> String {
        self.lock().info.name.clone()
    }

    /// Whether the package currently reacts to update notifications
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.lock().update_subscription.is_some()
    }

    /// Run one build cycle
    ///
    /// Always ends with exactly one `Ready` or `Error` event, unless the
    /// package is removed while the cycle runs.
    pub async fn build(&self) {
        self.pause_updates();
        {
            let mut state = self.lock();
            if state.removed {
                return;
            }
            state.info.status = PackageStatus::Building;
        }
        tracing::debug!(path = %self.path.display(), "building package");

        let manifest_path = self.path.join(&self.settings.manifest_file);
        let value = match manifest::read_manifest(&manifest_path).await {
            Ok(value) => value,
            Err(e) => {
                // Not re-subscribed: the scanner re-adds the path once the
                // manifest becomes readable again.
                self.fail(format!("failed to read manifest: {e}"), false);
                return;
            }
        };

        let fallback_name = folder_name(&self.path);
        let manifest = match PackageManifest::from_value(
            &value,
            &self.settings.namespace,
            &manifest_path,
            &fallback_name,
        ) {
            Ok(manifest) => manifest,
            Err(e) => {
                self.fail(e.to_string(), true);
                return;
            }
        };

        let definitions: Vec<Arc<PluginDefinition>> = normalize_definitions(
            &manifest.name,
            &manifest.description,
            &manifest.plugins,
            &self.settings.ignored,
        )
        .into_iter()
        .map(Arc::new)
        .collect();

        if let Some(queue) = &self.settings.build_queue {
            {
                let mut state = self.lock();
                state.info.name.clone_from(&manifest.name);
            }
            let request = BuildRequest {
                package_name: manifest.name.clone(),
                path: self.path.clone(),
                script: manifest.build_script.clone(),
            };
            if let Err(e) = run_build(queue.as_ref(), request).await {
                self.fail(e.to_string(), true);
                return;
            }
        }

        let diff = {
            let mut state = self.lock();
            if state.removed {
                return;
            }
            let diff = DefinitionDiff::between(&state.info.plugin_definitions, &definitions);
            state.info = PackageInfo {
                path: self.path.clone(),
                name: manifest.name,
                version: manifest.version,
                description: manifest.description,
                homepage: manifest.homepage,
                author: manifest.author,
                license: manifest.license,
                plugin_definitions: definitions,
                status: PackageStatus::Ready,
                error_message: None,
            };
            diff
        };

        tracing::info!(
            path = %self.path.display(),
            added = diff.added.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            "package ready"
        );

        if let Some(package) = self.weak_self.upgrade() {
            self.events.emit(&PackageEvent::Ready { diff, package });
        }
        self.resume_updates();
    }

    /// Retire the package
    ///
    /// Emits one final `Removed` event listing every known definition and
    /// stops listening for updates for good.
    pub fn remove(&self) {
        self.pause_updates();
        let removed = {
            let mut state = self.lock();
            if state.removed {
                return;
            }
            state.removed = true;
            std::mem::take(&mut state.info.plugin_definitions)
        };

        tracing::info!(
            path = %self.path.display(),
            plugins = removed.len(),
            "package removed"
        );

        if let Some(package) = self.weak_self.upgrade() {
            self.events.emit(&PackageEvent::Removed {
                diff: DefinitionDiff::removing_all(removed),
                package,
            });
        }
    }

    fn fail(&self, message: String, resubscribe: bool) {
        {
            let mut state = self.lock();
            if state.removed {
                return;
            }
            state.info.status = PackageStatus::Error;
            state.info.error_message = Some(message.clone());
        }
        tracing::warn!(path = %self.path.display(), error = %message, "package error");

        if let Some(package) = self.weak_self.upgrade() {
            self.events.emit(&PackageEvent::Error { message, package });
        }
        if resubscribe {
            self.resume_updates();
        }
    }

    /// Stop reacting to updates, returning true if the package was listening
    fn pause_updates(&self) -> bool {
        let id = self.lock().update_subscription.take();
        match (id, &self.settings.updates) {
            (Some(id), Some(updates)) => {
                updates.unsubscribe(id);
                true
            }
            _ => false,
        }
    }

    fn resume_updates(&self) {
        let Some(updates) = &self.settings.updates else {
            return;
        };
        let mut state = self.lock();
        if state.removed || state.update_subscription.is_some() {
            return;
        }

        let weak = self.weak_self.clone();
        let path = self.path.clone();
        let id = updates.subscribe(move |event| {
            let ScanEvent::Updated(updated) = event else {
                return;
            };
            if *updated != path {
                return;
            }
            let Some(package) = weak.upgrade() else {
                return;
            };
            if package.pause_updates() {
                tokio::spawn(async move { package.build().await });
            }
        });
        state.update_subscription = Some(id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PackageState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("path", &self.path)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Enqueue a build and wait for its completion event
///
/// # Errors
///
/// Returns [`Error::Build`] if the collaborator reports a failure or drops
/// the request
async fn run_build(queue: &dyn BuildQueue, request: BuildRequest) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let path = request.path.clone();

    let watched = path.clone();
    let subscription = queue.finished().subscribe(move |finished: &BuildFinished| {
        if finished.path != watched {
            return;
        }
        let sender = tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(finished.clone());
        }
    });

    queue.enqueue(request);
    let outcome = rx.await;
    queue.finished().unsubscribe(subscription);

    let message = match outcome {
        Ok(finished) if finished.success => return Ok(()),
        Ok(finished) => finished
            .error_message
            .unwrap_or_else(|| "build failed".to_string()),
        Err(_) => "build collaborator dropped the request".to_string(),
    };
    Err(Error::Build { path, message })
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

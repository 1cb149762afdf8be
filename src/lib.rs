//! Omni Plugin Host - discovers, loads and hot-swaps plugin packages
//!
//! Packages are folders with a manifest listing plugins. The host watches
//! plugin roots, builds packages as they appear or change, and hands each
//! plugin to the loader registered for its type. Loaders install handlers
//! into a live request pipeline whose entries are swapped in place, so the
//! HTTP server never restarts.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                   Plugin roots (disk)                 │
//! └──────────────────────────┬────────────────────────────┘
//!                            │ Scanner
//! ┌──────────────────────────▼────────────────────────────┐
//! │  Package: manifest, definitions, build, diff          │
//! └──────────────────────────┬────────────────────────────┘
//!                            │ ready / removed / error
//! ┌──────────────────────────▼────────────────────────────┐
//! │  Registry: loaders, requires, retries, name conflicts │
//! └──────────────────────────┬────────────────────────────┘
//!                            │ load / unload
//! ┌──────────────────────────▼────────────────────────────┐
//! │  Loaders ──▶ Pipeline (hot-swap slots, middleware)    │
//! └───────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod loader;
pub mod package;
pub mod pipeline;
pub mod plugin;
pub mod registry;
pub mod scanner;

pub use config::{HostConfig, RootFolder};
pub use error::{Error, Result};
pub use events::{Publisher, SubscriptionId};
pub use host::{PluginHost, PluginHostBuilder};
pub use loader::{LoadContext, Loader};
pub use package::{Package, PackageEvent, PackageInfo, PackageStatus, PluginDefinition};
pub use pipeline::{HotSwapSlot, MiddlewareChain, Next, Pipeline, RequestHandler};
pub use plugin::{BootstrapResolver, ExportTable, Plugin, PluginId, PluginInfo, PluginStatus};
pub use registry::{Registry, RegistryEvent};
pub use scanner::{ScanEvent, Scanner};

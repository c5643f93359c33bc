//! # Voltcore
//!
//! A self-hostable content storage backend: workspaces holding a tree of
//! files and folders, immutable snapshots with conversion pipelines, a
//! permission model shared by users and groups, and a WebDAV gateway. Usable
//! both as a standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! voltcore = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voltcore::auth::IdentityService;
//! use voltcore::cache::MemoryCache;
//! use voltcore::conversion::{LocalLauncher, LocalPipelineBackend, Scheduler, SchedulerOptions};
//! use voltcore::search::MemorySearch;
//! use voltcore::server::{AppState, create_router};
//! use voltcore::service::{Core, Services, Settings};
//! use voltcore::storage::FsObjectStore;
//! use voltcore::store::{SqliteStore, Store};
//!
//! let store: Arc<dyn Store> = Arc::new(SqliteStore::new("./data/voltcore.db").unwrap());
//! store.initialize().unwrap();
//! let objects = Arc::new(FsObjectStore::new("./data/objects"));
//!
//! let core = Core::new(
//!     store.clone(),
//!     objects.clone(),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(MemorySearch::new()),
//!     Settings::default(),
//! );
//! let backend = Arc::new(LocalPipelineBackend::new(core.clone()));
//! let scheduler = Scheduler::new(backend, objects, SchedulerOptions::default());
//! let services = Services::new(core, Arc::new(LocalLauncher::new(scheduler)));
//!
//! let identity = Arc::new(IdentityService::new(store, 3600));
//! let router = create_router(Arc::new(AppState::new(services, identity, "secret")));
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `voltcore` binary. Disable with `default-features = false`.
//! - `s3`: S3-compatible object storage.

pub mod auth;
pub mod cache;
pub mod config;
pub mod conversion;
pub mod error;
pub mod remote;
pub mod search;
pub mod server;
pub mod service;
pub mod storage;
pub mod store;
pub mod types;
pub mod webdav;

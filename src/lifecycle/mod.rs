//! Lifecycle: the three hooks through which the host drives a worker.
//!
//! A [`Worker`] exposes exactly three handlers: `install`, `activate` and
//! `fetch`. The host ([`Runtime`]) owns the state machine, sequences install
//! before activate, and only routes requests to `fetch` once activation has
//! finished.
//!
//! ```text
//! Parsed ──install──▶ Installing ──ok──▶ Installed ──activate──▶ Activating ──▶ Activated
//!                          │
//!                          └──err──▶ Redundant (install may be retried)
//! ```

mod runtime;
mod worker;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use url::Url;

use crate::BoxFuture;
use crate::background::{TaskGroup, TaskResult};
use crate::http::{Request, Response};
use crate::preload::{NavigationPreloadManager, PreloadResponse};

pub use runtime::{Dispatched, LifecycleError, Runtime};
pub use worker::CacheFirstWorker;

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// What the host knows about the worker's registration.
#[derive(Debug)]
pub struct Registration {
    scope: Url,
    navigation_preload: Option<Arc<NavigationPreloadManager>>,
}

impl Registration {
    /// A registration without navigation preload support.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            navigation_preload: None,
        }
    }

    /// Offers navigation preload to the worker.
    #[must_use]
    pub fn with_navigation_preload(mut self, manager: NavigationPreloadManager) -> Self {
        self.navigation_preload = Some(Arc::new(manager));
        self
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// `None` when the host does not support navigation preload.
    pub fn navigation_preload(&self) -> Option<&Arc<NavigationPreloadManager>> {
        self.navigation_preload.as_ref()
    }
}

/// An event whose completion can be extended with [`wait_until`](Self::wait_until).
pub struct ExtendableEvent {
    registration: Arc<Registration>,
    tasks: TaskGroup,
}

/// Dispatched once, before the worker may serve requests.
pub type InstallEvent = ExtendableEvent;

/// Dispatched after a successful install.
pub type ActivateEvent = ExtendableEvent;

impl ExtendableEvent {
    pub(crate) fn new(registration: Arc<Registration>) -> Self {
        Self {
            registration,
            tasks: TaskGroup::new(),
        }
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// Keeps the event open until `work` finishes. A failing `work` fails the event.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        self.tasks.spawn(work);
    }

    pub(crate) fn tasks(&self) -> &TaskGroup {
        &self.tasks
    }
}

/// One intercepted request handed to [`Worker::fetch`].
pub struct FetchEvent {
    request: Request,
    preload: PreloadResponse,
    registration: Arc<Registration>,
    tasks: TaskGroup,
}

impl FetchEvent {
    pub fn new(
        request: Request,
        preload: PreloadResponse,
        registration: Arc<Registration>,
        tasks: TaskGroup,
    ) -> Self {
        Self {
            request,
            preload,
            registration,
            tasks,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// Keeps the request-handling task alive until `work` finishes.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        self.tasks.spawn(work);
    }

    /// Splits the event into the request, its preload and the task group
    /// that the host awaits after responding.
    pub fn into_parts(self) -> (Request, PreloadResponse, TaskGroup) {
        (self.request, self.preload, self.tasks)
    }
}

/// The lifecycle adapter a worker implements.
pub trait Worker: Send + Sync {
    /// Prepare everything needed to serve offline; register the work with
    /// [`ExtendableEvent::wait_until`].
    fn install(&self, event: &InstallEvent);

    /// Turn on runtime features once installed.
    fn activate(&self, event: &ActivateEvent);

    /// Produce the response for one intercepted request. Must always return.
    fn fetch(&self, event: FetchEvent) -> BoxFuture<'_, Response>;
}

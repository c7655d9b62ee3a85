//! The host side of the lifecycle.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ExtendableEvent, FetchEvent, Registration, Worker, WorkerState};
use crate::background::{BoxError, TaskGroup};
use crate::fetch::Fetch;
use crate::http::{Request, Response, StatusCode};
use crate::preload::PreloadResponse;

/// Lifecycle failures surfaced to whoever starts the runtime.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("install failed: {source}")]
    InstallFailed {
        #[source]
        source: BoxError,
    },

    #[error("cannot {action} a worker that is {actual}")]
    InvalidState {
        action: &'static str,
        actual: WorkerState,
    },
}

/// Result of dispatching one request.
///
/// `tasks` holds the detached work (cache writes) the worker scheduled. Send
/// `response` first, then await `tasks.wait()`.
pub struct Dispatched {
    pub response: Response,
    pub tasks: TaskGroup,
}

/// Hosts a single [`Worker`]: drives install and activate, then intercepts requests.
pub struct Runtime {
    worker: Arc<dyn Worker>,
    fetcher: Arc<dyn Fetch>,
    registration: Arc<Registration>,
    state: RwLock<WorkerState>,
}

impl Runtime {
    pub fn new(worker: Arc<dyn Worker>, fetcher: Arc<dyn Fetch>, registration: Registration) -> Self {
        Self {
            worker,
            fetcher,
            registration: Arc::new(registration),
            state: RwLock::new(WorkerState::Parsed),
        }
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// Runs install then activate. The worker serves requests only once this
    /// returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InstallFailed`] if any install work failed;
    /// the worker is then redundant and `start` may be called again.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        self.install().await?;
        self.activate().await
    }

    /// Calls [`start`](Self::start) until it succeeds, sleeping between
    /// attempts with exponential backoff from `initial` up to `max`.
    ///
    /// Requests keep passing through to the network while this runs. Returns
    /// the number of attempts taken.
    pub async fn start_with_retry(&self, initial: Duration, max: Duration) -> u32 {
        let mut delay = initial;
        let mut attempt = 1;
        loop {
            match self.start().await {
                Ok(()) => return attempt,
                Err(e) => {
                    warn!(attempt, error = %e, retry_in = ?delay, "worker start failed, retrying");
                }
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(max);
            attempt += 1;
        }
    }

    /// Dispatches the install event and waits for all of its work.
    pub async fn install(&self) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.write().await;
            if !matches!(*state, WorkerState::Parsed | WorkerState::Redundant) {
                return Err(LifecycleError::InvalidState {
                    action: "install",
                    actual: *state,
                });
            }
            *state = WorkerState::Installing;
        }

        info!(scope = %self.registration.scope(), "installing worker");
        let event = ExtendableEvent::new(Arc::clone(&self.registration));
        self.worker.install(&event);

        match event.tasks().wait().await {
            Ok(()) => {
                *self.state.write().await = WorkerState::Installed;
                info!("worker installed");
                Ok(())
            }
            Err(source) => {
                *self.state.write().await = WorkerState::Redundant;
                warn!(error = %source, "worker install failed");
                Err(LifecycleError::InstallFailed { source })
            }
        }
    }

    /// Dispatches the activate event. Failed activate work is logged; the
    /// worker still becomes active.
    pub async fn activate(&self) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.write().await;
            if *state != WorkerState::Installed {
                return Err(LifecycleError::InvalidState {
                    action: "activate",
                    actual: *state,
                });
            }
            *state = WorkerState::Activating;
        }

        let event = ExtendableEvent::new(Arc::clone(&self.registration));
        self.worker.activate(&event);
        if let Err(e) = event.tasks().wait().await {
            warn!(error = %e, "activate work failed");
        }

        *self.state.write().await = WorkerState::Activated;
        info!("worker activated");
        Ok(())
    }

    /// Routes one intercepted request.
    ///
    /// Until the worker is active, requests go straight to the network. Once
    /// active, navigations get a race-started preload when enabled, and the
    /// worker's `fetch` handler produces the response.
    pub async fn dispatch(&self, request: Request) -> Dispatched {
        let tasks = TaskGroup::new();

        if self.state().await != WorkerState::Activated {
            debug!(url = %request.url(), "worker not active, passing through");
            let response = self.passthrough(request).await;
            return Dispatched { response, tasks };
        }

        let preload = match self.registration.navigation_preload() {
            Some(manager) if manager.is_enabled() && request.is_navigation() => {
                PreloadResponse::spawn(Arc::clone(&self.fetcher), manager.preload_request(&request))
            }
            _ => PreloadResponse::none(),
        };

        let event = FetchEvent::new(request, preload, Arc::clone(&self.registration), tasks.clone());
        let response = self.worker.fetch(event).await;
        Dispatched { response, tasks }
    }

    async fn passthrough(&self, request: Request) -> Response {
        match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "passthrough fetch failed");
                Response::new(StatusCode::BAD_GATEWAY)
                    .header("Content-Type", "text/plain")
                    .body(format!("Upstream unavailable: {e}"))
            }
        }
    }
}

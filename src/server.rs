//! Dispatch binder and HTTP server.
//!
//! [`Dispatcher::bind`] turns the configured handlers into routes and the
//! configured tasks into cron jobs. [`start`] wires everything to a TCP
//! listener and runs until Ctrl-C.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::api::{self, STATUS_PATH, storage::STORAGE_PATHS};
use crate::backends::BackendRegistry;
use crate::config::{Config, UnitKind};
use crate::core::CronScheduler;
use crate::run::{RunCommand, resolve};
use crate::storage::{Storage, SurrealStorage};

/// The route table and the task schedule of one server run.
pub struct Dispatcher {
    router: Router,
    scheduler: CronScheduler,
    routes: BTreeSet<String>,
}

impl Dispatcher {
    /// Resolve every unit of `config` and bind it to its trigger.
    ///
    /// Units that fail to resolve, and routes or periods that cannot be
    /// registered, are logged and skipped.
    pub fn bind(config: &Config, registry: &BackendRegistry, storage: Option<Arc<dyn Storage>>) -> Self {
        let mut dispatcher = Self {
            router: Router::new().route(STATUS_PATH, api::status_route()),
            scheduler: CronScheduler::new(),
            routes: BTreeSet::from([STATUS_PATH.to_string()]),
        };

        if let Some(storage) = storage {
            dispatcher.router = dispatcher.router.merge(api::storage_routes(storage));
            dispatcher
                .routes
                .extend(STORAGE_PATHS.iter().map(|path| path.to_string()));
        }

        dispatcher.bind_handlers(config, registry);
        dispatcher.bind_tasks(config, registry);
        dispatcher
    }

    fn bind_handlers(&mut self, config: &Config, registry: &BackendRegistry) {
        let units_root = config.units_root(UnitKind::Handler);

        for (name, unit) in &config.handlers {
            let command = match resolve(UnitKind::Handler, &units_root, name, unit, registry) {
                Ok(command) => command,
                Err(err) => {
                    error!("{}", err);
                    continue;
                }
            };

            if !api::is_literal_path(&unit.path) {
                error!(unit = %name, path = %unit.path, "handler path is not a literal route, skipping");
                continue;
            }
            if self.routes.contains(&unit.path) {
                error!(unit = %name, path = %unit.path, "handler path is already registered, skipping");
                continue;
            }

            info!(unit = %name, path = %unit.path, "handler registered");
            let router = std::mem::take(&mut self.router);
            self.router = router.route(&unit.path, api::unit_route(Arc::new(command)));
            self.routes.insert(unit.path.clone());
        }
    }

    fn bind_tasks(&mut self, config: &Config, registry: &BackendRegistry) {
        let units_root = config.units_root(UnitKind::Task);

        for (name, unit) in &config.tasks {
            let command = match resolve(UnitKind::Task, &units_root, name, unit, registry) {
                Ok(command) => Arc::new(command),
                Err(err) => {
                    error!("{}", err);
                    continue;
                }
            };

            let logs_enable = unit.logs_enable;
            let added = self.scheduler.add(name.clone(), &unit.period, move || {
                let command = command.clone();
                Box::pin(async move {
                    run_task(&command, logs_enable).await;
                })
            });

            match added {
                Ok(()) => info!(unit = %name, period = %unit.period, "task scheduled"),
                Err(err) => error!("{}", err),
            }
        }
    }

    /// Registered paths, `/status` and storage routes included.
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(String::as_str)
    }

    /// Names of the scheduled tasks.
    pub fn scheduled_tasks(&self) -> Vec<String> {
        self.scheduler.job_names()
    }

    /// The route table with request tracing applied.
    pub fn router(&self) -> Router {
        api::with_tracing(self.router.clone())
    }

    /// Serve on `listener` until `shutdown` resolves. The scheduler runs for
    /// exactly as long as the server.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let scheduler = self.scheduler.start();

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .context("server error");

        scheduler.stop().await;
        served
    }
}

/// Run one scheduled task to completion and return what it wrote.
///
/// The output is traced only when `logs_enable` is set; otherwise `None` is
/// returned and nothing is emitted.
pub async fn run_task(command: &RunCommand, logs_enable: bool) -> Option<String> {
    if logs_enable {
        debug!(unit = %command.name(), kind = %command.kind(), "task started");
    }

    let mut output = Vec::new();
    let mut input = tokio::io::empty();
    command.invoke(&mut output, &mut input).await;

    if !logs_enable {
        return None;
    }

    let returned = String::from_utf8_lossy(&output).into_owned();
    info!(unit = %command.name(), kind = %command.kind(), "returned: {}", returned);
    Some(returned)
}

/// Resolve once, then serve handlers, tasks and storage until Ctrl-C.
pub async fn start(config: &Config, registry: &BackendRegistry) -> Result<()> {
    let storage: Option<Arc<dyn Storage>> = if config.database.enable {
        let storage = SurrealStorage::connect(&config.database)
            .await
            .context("failed to initialize storage")?;
        Some(Arc::new(storage))
    } else {
        None
    };

    let dispatcher = Dispatcher::bind(config, registry, storage);

    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;

    info!("Server listening on http://{}", address);

    dispatcher.serve(listener, shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => {
            warn!("Failed to listen for Ctrl-C: {}", err);
            // Never resolve, the server then runs until killed.
            std::future::pending::<()>().await;
        }
    }
}

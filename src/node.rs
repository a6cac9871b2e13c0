use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::NodeConfig;
use crate::error::Result;
use crate::scheduler::BlockScheduler;

/// Runs the scheduler: sweep loop, observation timer and API server.
pub struct SchedulerNode {
    pub config: NodeConfig,
    pub scheduler: Arc<BlockScheduler>,
    extra_routes: Option<Router>,
}

impl SchedulerNode {
    pub fn new(config: NodeConfig, scheduler: Arc<BlockScheduler>) -> Self {
        Self {
            config,
            scheduler,
            extra_routes: None,
        }
    }

    /// Serve additional routes next to the scheduler API.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.extra_routes = Some(routes);
        self
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// 1. Spawns the observation timer, which closes the window on time even
    ///    when no request arrives
    /// 2. Spawns the schedule loop, one generator sweep per interval
    /// 3. Runs the API server (blocking) and drains both tasks afterwards
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler config is invalid, or if the API
    /// server cannot bind or fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.config.scheduler.validate()?;

        let observation_handle = {
            let scheduler = self.scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                Self::observation_timer(scheduler, shutdown).await;
            })
        };

        let schedule_handle = {
            let scheduler = self.scheduler.clone();
            let shutdown = shutdown.clone();
            let interval = self.config.scheduler.scheduling_interval;
            tokio::spawn(async move {
                Self::schedule_loop(scheduler, interval, shutdown).await;
            })
        };

        let mut app = api::router(ApiState {
            scheduler: self.scheduler.clone(),
        });
        if let Some(routes) = self.extra_routes {
            app = app.merge(routes);
        }

        let result = api::serve(self.config.listen_addr, app, shutdown.clone()).await;

        // Stop background tasks even when the server failed on its own.
        shutdown.cancel();
        let _ = observation_handle.await;
        let _ = schedule_handle.await;
        tracing::info!("Scheduler stopped");
        result
    }

    async fn observation_timer(scheduler: Arc<BlockScheduler>, shutdown: CancellationToken) {
        let Some(remaining) = scheduler.observation_remaining().await else {
            return;
        };
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(remaining) => {
                scheduler.end_observation().await;
            }
        }
    }

    /// Sweep the log every `interval`. Failed sweeps are retried on the next tick.
    async fn schedule_loop(
        scheduler: Arc<BlockScheduler>,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    // Errors are logged by the scheduler; the table is unchanged.
                    let _ = scheduler.update_schedule().await;
                }
            }
        }
    }
}

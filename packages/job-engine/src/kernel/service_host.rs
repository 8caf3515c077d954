//! Long-running service host.
//!
//! Services run on their own tasks and share one shutdown token. The host
//! fires the token on Ctrl+C (or a caller-supplied signal), then gives the
//! services a grace period to return before aborting them.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A long-running background service.
#[async_trait]
pub trait Service: Send + 'static {
    fn name(&self) -> &'static str;

    /// Run until `shutdown` fires.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

pub struct ServiceHost {
    services: Vec<Box<dyn Service>>,
    shutdown: CancellationToken,
    grace_period: Duration,
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHost {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            shutdown: CancellationToken::new(),
            grace_period: Duration::from_secs(30),
        }
    }

    pub fn with_service(mut self, service: impl Service) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Share an existing token, e.g. the parent of every job token.
    pub fn with_shutdown_token(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run all services until Ctrl+C.
    pub async fn run_until_shutdown(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await
    }

    /// Run all services until `signal` resolves, the shutdown token fires, or
    /// any service returns.
    pub async fn run_until(self, signal: impl Future<Output = ()>) -> Result<()> {
        let ServiceHost {
            services,
            shutdown,
            grace_period,
        } = self;

        let mut tasks = JoinSet::new();
        for service in services {
            let name = service.name();
            let token = shutdown.clone();
            info!(service = name, "starting service");
            tasks.spawn(async move { (name, service.run(token).await) });
        }

        let mut first_error = None;
        tokio::select! {
            _ = signal => {}
            _ = shutdown.cancelled() => {}
            Some(joined) = tasks.join_next() => {
                if let Some(e) = record_exit(joined) {
                    first_error.get_or_insert(e);
                }
            }
        }
        shutdown.cancel();

        let drained = tokio::time::timeout(grace_period, async {
            let mut errors = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                errors.extend(record_exit(joined));
            }
            errors
        })
        .await;

        match drained {
            Ok(errors) => {
                if first_error.is_none() {
                    first_error = errors.into_iter().next();
                }
            }
            Err(_) => {
                warn!(
                    remaining = tasks.len(),
                    grace_secs = grace_period.as_secs(),
                    "services did not stop within grace period, aborting"
                );
                tasks.abort_all();
            }
        }

        info!("all services stopped");
        first_error.map_or(Ok(()), Err)
    }
}

fn record_exit(
    joined: std::result::Result<(&'static str, Result<()>), tokio::task::JoinError>,
) -> Option<anyhow::Error> {
    match joined {
        Ok((name, Ok(()))) => {
            info!(service = name, "service stopped");
            None
        }
        Ok((name, Err(e))) => {
            error!(service = name, error = %e, "service failed");
            Some(e.context(format!("service {name} failed")))
        }
        Err(e) => {
            error!(error = %e, "service task panicked");
            Some(anyhow::anyhow!("service task panicked: {e}"))
        }
    }
}

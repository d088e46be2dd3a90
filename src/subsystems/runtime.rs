//! Component runtime shared by the long-running parts of the bot.
//!
//! A [`Component`] is an independently runnable unit (a chat channel, the
//! file watcher) that captures its shared state at construction time.
//! [`spawn_components`] runs a set of them on a `JoinSet`; the first one to
//! fail cancels the shared token so its siblings wind down too.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::AppError;

pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

pub trait Component: Send + 'static {
    /// Stable identifier used in logs.
    fn id(&self) -> &str;

    /// Consume the component and return its run loop. The loop should end
    /// when `shutdown` is cancelled.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

/// Handle onto a running component set.
pub struct SubsystemHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl SubsystemHandle {
    /// Wait for every component and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Comms(format!("component manager panicked: {e}"))),
        }
    }
}

pub fn spawn_components(components: Vec<Box<dyn Component>>, shutdown: CancellationToken) -> SubsystemHandle {
    let inner = tokio::spawn(async move {
        let mut set: JoinSet<(String, Result<(), AppError>)> = JoinSet::new();
        for component in components {
            let id = component.id().to_string();
            debug!(component = %id, "spawning component");
            let fut = component.run(shutdown.clone());
            set.spawn(async move { (id, fut.await) });
        }

        let mut first_err: Option<AppError> = None;
        while let Some(res) = set.join_next().await {
            match res {
                Ok((id, Ok(()))) => info!(component = %id, "component stopped"),
                Ok((id, Err(e))) => {
                    error!(component = %id, error = %e, "component failed");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    error!(error = %e, "component panicked");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| AppError::Comms(format!("component panicked: {e}")));
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    });
    SubsystemHandle { inner }
}

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::context::{Context, ContextError};

pub const DEFAULT_DEREGISTRATION_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RegistryError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UninstallError {
    #[error("describing managed instance `{instance_id}`: {source}")]
    Registry {
        instance_id: String,
        #[source]
        source: RegistryError,
    },

    #[error("timed out waiting for managed instance `{0}` to be deregistered")]
    Timeout(String),

    #[error("cancelled while waiting for managed instance `{0}` to be deregistered")]
    Cancelled(String),
}

/// Registration state of SSM managed instances.
pub trait ManagedInstanceRegistry {
    /// Returns whether `instance_id` is currently registered as a managed instance.
    fn is_managed_instance(&self, instance_id: &str) -> Result<bool, RegistryError>;
}

impl<T> ManagedInstanceRegistry for &T
where
    T: ManagedInstanceRegistry + ?Sized,
{
    fn is_managed_instance(&self, instance_id: &str) -> Result<bool, RegistryError> {
        (**self).is_managed_instance(instance_id)
    }
}

/// Polls the registry at a constant interval until an instance is deregistered.
pub struct UninstallVerifier<R>
where
    R: ManagedInstanceRegistry,
{
    registry: R,
    poll_interval: Duration,
}

impl<R> UninstallVerifier<R>
where
    R: ManagedInstanceRegistry,
{
    pub fn new(registry: R, poll_interval: Duration) -> Self {
        Self {
            registry,
            poll_interval,
        }
    }

    /// Blocks until `instance_id` is no longer a managed instance.
    ///
    /// Returns [UninstallError::Timeout] when the context deadline expires first and
    /// [UninstallError::Cancelled] when the context gets cancelled.
    pub fn wait_for_deregistration(
        &self,
        ctx: &Context,
        instance_id: &str,
    ) -> Result<(), UninstallError> {
        let mut attempt = 0;
        loop {
            if let Some(err) = ctx.err() {
                return Err(interrupted(err, instance_id));
            }

            attempt += 1;
            let registered = self
                .registry
                .is_managed_instance(instance_id)
                .map_err(|source| UninstallError::Registry {
                    instance_id: instance_id.to_string(),
                    source,
                })?;
            if !registered {
                info!(instance_id, "managed instance deregistered");
                return Ok(());
            }
            debug!(instance_id, attempt, "managed instance still registered");

            ctx.wait(self.poll_interval)
                .map_err(|err| interrupted(err, instance_id))?;
        }
    }
}

fn interrupted(err: ContextError, instance_id: &str) -> UninstallError {
    match err {
        ContextError::Cancelled => UninstallError::Cancelled(instance_id.to_string()),
        ContextError::DeadlineExceeded => UninstallError::Timeout(instance_id.to_string()),
    }
}

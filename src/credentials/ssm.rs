use std::time::Duration;

use tracing::{debug, info};

use super::{CredentialProviderName, HybridNode, NodeadmCredentialsProvider, ProviderError};
use crate::{
    context::Context,
    nodeadm::config::{ClusterDetails, File, HybridOptions, NodeConfig, SsmActivation},
    ssm::{
        activation::{ActivationRegistrar, RegistrationError},
        instance::{
            ManagedInstanceRegistry, UninstallVerifier, DEFAULT_DEREGISTRATION_POLL_INTERVAL,
        },
        SSM_ACTIVATION_NAME,
    },
};

/// Joins nodes through SSM hybrid activations.
///
/// Every call to [NodeadmCredentialsProvider::nodeadm_config] creates a new single-use
/// activation. The node name is only known once the instance registers (`mi-…`).
pub struct SsmProvider<C>
where
    C: ActivationRegistrar + ManagedInstanceRegistry,
{
    client: C,
    role: String,
    poll_interval: Duration,
}

impl<C> SsmProvider<C>
where
    C: ActivationRegistrar + ManagedInstanceRegistry,
{
    pub fn new(client: C, role: impl Into<String>) -> Self {
        Self {
            client,
            role: role.into(),
            poll_interval: DEFAULT_DEREGISTRATION_POLL_INTERVAL,
        }
    }

    /// Interval between deregistration checks in [NodeadmCredentialsProvider::verify_uninstall].
    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    fn registration_error(&self, source: RegistrationError) -> ProviderError {
        ProviderError::Registration {
            provider: self.name(),
            source,
        }
    }
}

impl<C> NodeadmCredentialsProvider for SsmProvider<C>
where
    C: ActivationRegistrar + ManagedInstanceRegistry,
{
    fn name(&self) -> CredentialProviderName {
        CredentialProviderName::Ssm
    }

    fn nodeadm_config(&self, cluster: &ClusterDetails) -> Result<NodeConfig, ProviderError> {
        debug!(role = %self.role, "creating SSM activation");
        let activation = self
            .client
            .register_activation(&self.role, SSM_ACTIVATION_NAME)
            .map_err(|err| self.registration_error(err))?;

        if activation.id.is_empty() {
            return Err(self.registration_error(RegistrationError::MissingField("activation id")));
        }
        if activation.code.is_empty() {
            return Err(self.registration_error(RegistrationError::MissingField(
                "activation code",
            )));
        }
        info!(
            cluster = %cluster.name,
            activation_id = %activation.id,
            "SSM activation created"
        );

        Ok(NodeConfig::new(
            cluster.clone(),
            HybridOptions::Ssm(SsmActivation {
                activation_id: activation.id,
                activation_code: activation.code,
            }),
        ))
    }

    fn files_for_node(&self) -> Result<Vec<File>, ProviderError> {
        Ok(Vec::new())
    }

    fn instance_id<'a>(&self, node: &'a HybridNode) -> &'a str {
        &node.node_name
    }

    fn verify_uninstall(&self, ctx: &Context, instance_id: &str) -> Result<(), ProviderError> {
        UninstallVerifier::new(&self.client, self.poll_interval)
            .wait_for_deregistration(ctx, instance_id)
            .map_err(|source| ProviderError::Uninstall {
                provider: self.name(),
                source,
            })
    }

    fn node_name(&self) -> Option<&str> {
        None
    }
}

//! Credential providers a hybrid node can use to authenticate against the cluster.
//!
//! Each mechanism differs in whether the node identity is known before joining, whether the
//! secrets travel inside the `NodeConfig` or as separate files, and whether teardown needs to
//! wait for a broker-side deregistration. [NodeadmCredentialsProvider] normalizes those
//! differences so the test driver doesn't need to know which mechanism it is running.
use std::fmt;

use thiserror::Error;

use crate::{
    context::Context,
    nodeadm::config::{ClusterDetails, File, NodeConfig},
    pki::CertificateIssueError,
    ssm::{
        activation::{ActivationRegistrar, RegistrationError},
        instance::{ManagedInstanceRegistry, UninstallError},
    },
};

pub mod iam_roles_anywhere;
pub mod ssm;

pub use iam_roles_anywhere::IamRolesAnywhereProvider;
pub use ssm::SsmProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} provider: {source}")]
    Registration {
        provider: CredentialProviderName,
        #[source]
        source: RegistrationError,
    },

    #[error("{provider} provider: {source}")]
    CertificateIssue {
        provider: CredentialProviderName,
        #[source]
        source: CertificateIssueError,
    },

    #[error("{provider} provider: {source}")]
    Uninstall {
        provider: CredentialProviderName,
        #[source]
        source: UninstallError,
    },

    #[error("invalid {provider} provider configuration: {reason}")]
    InvalidConfig {
        provider: CredentialProviderName,
        reason: String,
    },
}

/// Identifier of the credential mechanism, also used as `nodeadm install --credential-provider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialProviderName {
    Ssm,
    IamRolesAnywhere,
}

impl CredentialProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssm => "ssm",
            Self::IamRolesAnywhere => "iam-ra",
        }
    }
}

impl fmt::Display for CredentialProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisioned test instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridNode {
    /// EC2 instance id, as known by the compute layer.
    pub instance_id: String,
    /// Name the node registered with in the cluster. For SSM nodes this is the managed instance
    /// id (`mi-…`).
    pub node_name: String,
}

pub trait NodeadmCredentialsProvider {
    fn name(&self) -> CredentialProviderName;

    /// Builds the `NodeConfig` of a node joining `cluster`.
    fn nodeadm_config(&self, cluster: &ClusterDetails) -> Result<NodeConfig, ProviderError>;

    /// Files to place on the instance before installing `nodeadm`.
    fn files_for_node(&self) -> Result<Vec<File>, ProviderError>;

    /// Identifier of `node` that is authoritative for this mechanism.
    fn instance_id<'a>(&self, node: &'a HybridNode) -> &'a str;

    /// Blocks until the mechanism confirms `instance_id` has been torn down.
    fn verify_uninstall(&self, ctx: &Context, instance_id: &str) -> Result<(), ProviderError>;

    /// Node name known before joining, `None` when the identity is assigned at join time.
    fn node_name(&self) -> Option<&str>;
}

/// Every supported credential mechanism.
pub enum CredentialProviders<C>
where
    C: ActivationRegistrar + ManagedInstanceRegistry,
{
    Ssm(SsmProvider<C>),
    IamRolesAnywhere(IamRolesAnywhereProvider),
}

impl<C> From<SsmProvider<C>> for CredentialProviders<C>
where
    C: ActivationRegistrar + ManagedInstanceRegistry,
{
    fn from(provider: SsmProvider<C>) -> Self {
        Self::Ssm(provider)
    }
}

impl<C> From<IamRolesAnywhereProvider> for CredentialProviders<C>
where
    C: ActivationRegistrar + ManagedInstanceRegistry,
{
    fn from(provider: IamRolesAnywhereProvider) -> Self {
        Self::IamRolesAnywhere(provider)
    }
}

impl<C> NodeadmCredentialsProvider for CredentialProviders<C>
where
    C: ActivationRegistrar + ManagedInstanceRegistry,
{
    fn name(&self) -> CredentialProviderName {
        match self {
            Self::Ssm(provider) => provider.name(),
            Self::IamRolesAnywhere(provider) => provider.name(),
        }
    }

    fn nodeadm_config(&self, cluster: &ClusterDetails) -> Result<NodeConfig, ProviderError> {
        match self {
            Self::Ssm(provider) => provider.nodeadm_config(cluster),
            Self::IamRolesAnywhere(provider) => provider.nodeadm_config(cluster),
        }
    }

    fn files_for_node(&self) -> Result<Vec<File>, ProviderError> {
        match self {
            Self::Ssm(provider) => provider.files_for_node(),
            Self::IamRolesAnywhere(provider) => provider.files_for_node(),
        }
    }

    fn instance_id<'a>(&self, node: &'a HybridNode) -> &'a str {
        match self {
            Self::Ssm(provider) => provider.instance_id(node),
            Self::IamRolesAnywhere(provider) => provider.instance_id(node),
        }
    }

    fn verify_uninstall(&self, ctx: &Context, instance_id: &str) -> Result<(), ProviderError> {
        match self {
            Self::Ssm(provider) => provider.verify_uninstall(ctx, instance_id),
            Self::IamRolesAnywhere(provider) => provider.verify_uninstall(ctx, instance_id),
        }
    }

    fn node_name(&self) -> Option<&str> {
        match self {
            Self::Ssm(provider) => provider.node_name(),
            Self::IamRolesAnywhere(provider) => provider.node_name(),
        }
    }
}

use std::sync::Arc;

use tracing::debug;

use super::{CredentialProviderName, HybridNode, NodeadmCredentialsProvider, ProviderError};
use crate::{
    context::Context,
    nodeadm::config::{ClusterDetails, File, HybridOptions, IamRolesAnywhere, NodeConfig},
    pki::CertificateAuthority,
};

pub const NODE_CERTIFICATE_PATH: &str = "/etc/iam/pki/server.pem";
pub const NODE_KEY_PATH: &str = "/etc/iam/pki/server.key";

/// Joins nodes with X.509 certificates trusted by an IAM Roles Anywhere trust anchor.
///
/// The node name is fixed upfront and becomes the certificate CN.
#[derive(Debug, Clone)]
pub struct IamRolesAnywhereProvider {
    node_name: String,
    role_arn: String,
    trust_anchor_arn: String,
    profile_arn: String,
    ca: Arc<CertificateAuthority>,
}

impl IamRolesAnywhereProvider {
    pub fn try_new(
        node_name: impl Into<String>,
        role_arn: impl Into<String>,
        trust_anchor_arn: impl Into<String>,
        profile_arn: impl Into<String>,
        ca: Arc<CertificateAuthority>,
    ) -> Result<Self, ProviderError> {
        let provider = Self {
            node_name: node_name.into(),
            role_arn: role_arn.into(),
            trust_anchor_arn: trust_anchor_arn.into(),
            profile_arn: profile_arn.into(),
            ca,
        };

        for (field, value) in [
            ("node_name", &provider.node_name),
            ("role_arn", &provider.role_arn),
            ("trust_anchor_arn", &provider.trust_anchor_arn),
            ("profile_arn", &provider.profile_arn),
        ] {
            if value.trim().is_empty() {
                return Err(ProviderError::InvalidConfig {
                    provider: CredentialProviderName::IamRolesAnywhere,
                    reason: format!("`{field}` cannot be empty"),
                });
            }
        }
        Ok(provider)
    }
}

impl NodeadmCredentialsProvider for IamRolesAnywhereProvider {
    fn name(&self) -> CredentialProviderName {
        CredentialProviderName::IamRolesAnywhere
    }

    fn nodeadm_config(&self, cluster: &ClusterDetails) -> Result<NodeConfig, ProviderError> {
        Ok(NodeConfig::new(
            cluster.clone(),
            HybridOptions::IamRolesAnywhere {
                node_name: self.node_name.clone(),
                iam_roles_anywhere: IamRolesAnywhere {
                    role_arn: self.role_arn.clone(),
                    trust_anchor_arn: self.trust_anchor_arn.clone(),
                    profile_arn: self.profile_arn.clone(),
                },
            },
        ))
    }

    fn files_for_node(&self) -> Result<Vec<File>, ProviderError> {
        let issued = self
            .ca
            .issue(&self.node_name)
            .map_err(|source| ProviderError::CertificateIssue {
                provider: self.name(),
                source,
            })?;
        debug!(node_name = %self.node_name, "issued node certificate");

        Ok(vec![
            File {
                path: NODE_CERTIFICATE_PATH.into(),
                content: issued.certificate_pem,
            },
            File {
                path: NODE_KEY_PATH.into(),
                content: issued.private_key_pem,
            },
        ])
    }

    fn instance_id<'a>(&self, node: &'a HybridNode) -> &'a str {
        &node.instance_id
    }

    fn verify_uninstall(&self, _ctx: &Context, _instance_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    fn node_name(&self) -> Option<&str> {
        Some(&self.node_name)
    }
}

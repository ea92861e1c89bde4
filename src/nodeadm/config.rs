//! `NodeConfig` document consumed by `nodeadm init`.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NODE_CONFIG_API_VERSION: &str = "node.eks.aws/v1alpha1";
pub const NODE_CONFIG_KIND: &str = "NodeConfig";

#[derive(Error, Debug)]
pub enum NodeConfigError {
    #[error("exactly one credential provider must be set in `spec.hybrid`, found {0}")]
    CredentialPayload(usize),

    #[error("`spec.hybrid.nodeName` is required with `iamRolesAnywhere`")]
    MissingNodeName,

    #[error("`spec.hybrid.nodeName` is only supported with `iamRolesAnywhere`")]
    UnexpectedNodeName,

    #[error("error serializing NodeConfig: `{0}`")]
    Serialize(#[from] serde_yaml::Error),
}

/// Name and region of the cluster the node joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDetails {
    pub name: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub api_version: String,
    pub kind: String,
    pub spec: NodeConfigSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    pub cluster: ClusterDetails,
    pub hybrid: HybridOptions,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsmActivation {
    pub activation_id: String,
    pub activation_code: String,
}

impl std::fmt::Debug for SsmActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsmActivation")
            .field("activation_id", &self.activation_id)
            .field("activation_code", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamRolesAnywhere {
    pub role_arn: String,
    pub trust_anchor_arn: String,
    pub profile_arn: String,
}

/// Credential mechanism of a hybrid node. Exactly one is always set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHybridOptions", into = "RawHybridOptions")]
pub enum HybridOptions {
    Ssm(SsmActivation),
    IamRolesAnywhere {
        node_name: String,
        iam_roles_anywhere: IamRolesAnywhere,
    },
}

/// Wire representation of [HybridOptions].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHybridOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iam_roles_anywhere: Option<IamRolesAnywhere>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ssm: Option<SsmActivation>,
}

impl TryFrom<RawHybridOptions> for HybridOptions {
    type Error = NodeConfigError;

    fn try_from(raw: RawHybridOptions) -> Result<Self, Self::Error> {
        match (raw.ssm, raw.iam_roles_anywhere, raw.node_name) {
            (Some(ssm), None, None) => Ok(Self::Ssm(ssm)),
            (Some(_), None, Some(_)) => Err(NodeConfigError::UnexpectedNodeName),
            (None, Some(iam_roles_anywhere), Some(node_name)) => Ok(Self::IamRolesAnywhere {
                node_name,
                iam_roles_anywhere,
            }),
            (None, Some(_), None) => Err(NodeConfigError::MissingNodeName),
            (Some(_), Some(_), _) => Err(NodeConfigError::CredentialPayload(2)),
            (None, None, _) => Err(NodeConfigError::CredentialPayload(0)),
        }
    }
}

impl From<HybridOptions> for RawHybridOptions {
    fn from(options: HybridOptions) -> Self {
        match options {
            HybridOptions::Ssm(ssm) => Self {
                node_name: None,
                iam_roles_anywhere: None,
                ssm: Some(ssm),
            },
            HybridOptions::IamRolesAnywhere {
                node_name,
                iam_roles_anywhere,
            } => Self {
                node_name: Some(node_name),
                iam_roles_anywhere: Some(iam_roles_anywhere),
                ssm: None,
            },
        }
    }
}

impl NodeConfig {
    pub fn new(cluster: ClusterDetails, hybrid: HybridOptions) -> Self {
        Self {
            api_version: NODE_CONFIG_API_VERSION.to_string(),
            kind: NODE_CONFIG_KIND.to_string(),
            spec: NodeConfigSpec { cluster, hybrid },
        }
    }

    pub fn to_yaml(&self) -> Result<String, NodeConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// File placed on the instance before installing `nodeadm`.
///
/// The consumer is responsible for writing it with the appropriate permissions.
#[derive(Clone, PartialEq, Eq)]
pub struct File {
    pub path: PathBuf,
    pub content: String,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("content", &format!("<{} bytes>", self.content.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn cluster() -> ClusterDetails {
        ClusterDetails {
            name: "hybrid-e2e".to_string(),
            region: "us-west-2".to_string(),
        }
    }

    #[test]
    fn serializes_ssm_config() {
        let config = NodeConfig::new(
            cluster(),
            HybridOptions::Ssm(SsmActivation {
                activation_id: "activation-id".to_string(),
                activation_code: "activation-code".to_string(),
            }),
        );

        let expected = r#"apiVersion: node.eks.aws/v1alpha1
kind: NodeConfig
spec:
  cluster:
    name: hybrid-e2e
    region: us-west-2
  hybrid:
    ssm:
      activationId: activation-id
      activationCode: activation-code
"#;
        assert_eq!(config.to_yaml().unwrap(), expected);
    }

    #[test]
    fn serializes_iam_roles_anywhere_config() {
        let config = NodeConfig::new(
            cluster(),
            HybridOptions::IamRolesAnywhere {
                node_name: "hybrid-node-1".to_string(),
                iam_roles_anywhere: IamRolesAnywhere {
                    role_arn: "arn:aws:iam::123456789012:role/hybrid".to_string(),
                    trust_anchor_arn: "arn:aws:rolesanywhere:us-west-2:123456789012:trust-anchor/ta"
                        .to_string(),
                    profile_arn: "arn:aws:rolesanywhere:us-west-2:123456789012:profile/p"
                        .to_string(),
                },
            },
        );

        let expected = r#"apiVersion: node.eks.aws/v1alpha1
kind: NodeConfig
spec:
  cluster:
    name: hybrid-e2e
    region: us-west-2
  hybrid:
    nodeName: hybrid-node-1
    iamRolesAnywhere:
      roleArn: arn:aws:iam::123456789012:role/hybrid
      trustAnchorArn: arn:aws:rolesanywhere:us-west-2:123456789012:trust-anchor/ta
      profileArn: arn:aws:rolesanywhere:us-west-2:123456789012:profile/p
"#;
        assert_eq!(config.to_yaml().unwrap(), expected);
    }

    #[test]
    fn deserializes_single_payload() {
        let config: NodeConfig = serde_yaml::from_str(
            r#"
apiVersion: node.eks.aws/v1alpha1
kind: NodeConfig
spec:
  cluster:
    name: hybrid-e2e
    region: us-west-2
  hybrid:
    ssm:
      activationId: id
      activationCode: code
"#,
        )
        .unwrap();
        assert_matches!(config.spec.hybrid, HybridOptions::Ssm(ssm) => {
            assert_eq!(ssm.activation_id, "id");
        });
    }

    #[test]
    fn rejects_invalid_hybrid_payloads() {
        struct TestCase {
            name: &'static str,
            hybrid: &'static str,
        }
        impl TestCase {
            fn run(self) {
                let doc = format!(
                    "cluster:\n  name: c\n  region: r\nhybrid:\n{}",
                    self.hybrid
                );
                let result = serde_yaml::from_str::<NodeConfigSpec>(&doc);
                assert!(result.is_err(), "case: {}", self.name);
            }
        }
        let test_cases = vec![
            TestCase {
                name: "no payload",
                hybrid: "  nodeName: n\n",
            },
            TestCase {
                name: "both payloads",
                hybrid: concat!(
                    "  nodeName: n\n",
                    "  ssm:\n    activationId: i\n    activationCode: c\n",
                    "  iamRolesAnywhere:\n",
                    "    roleArn: r\n    trustAnchorArn: t\n    profileArn: p\n",
                ),
            },
            TestCase {
                name: "iam roles anywhere without node name",
                hybrid: concat!(
                    "  iamRolesAnywhere:\n",
                    "    roleArn: r\n    trustAnchorArn: t\n    profileArn: p\n",
                ),
            },
            TestCase {
                name: "ssm with node name",
                hybrid: "  nodeName: n\n  ssm:\n    activationId: i\n    activationCode: c\n",
            },
        ];
        test_cases.into_iter().for_each(TestCase::run);
    }
}

//! Test run configuration.
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use duration_str::deserialize_duration;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::{
    artifact::DEFAULT_URL_TTL,
    credentials::{CredentialProviders, IamRolesAnywhereProvider, ProviderError, SsmProvider},
    nodeadm::config::ClusterDetails,
    pki::{CertificateAuthority, CertificateIssueError},
    ssm::{
        activation::ActivationRegistrar,
        command::DEFAULT_COMMAND_POLL_INTERVAL,
        instance::{ManagedInstanceRegistry, DEFAULT_DEREGISTRATION_POLL_INTERVAL},
    },
};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_UNINSTALL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const SELF_SIGNED_CA_NAME: &str = "eks-hybrid-e2e-ca";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading `{path}`: `{source}`")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing `{path}`: `{source}`")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("loading certificate authority: `{0}`")]
    CertificateAuthority(#[from] CertificateIssueError),

    #[error("{0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct E2eConfig {
    pub cluster: ClusterDetails,
    pub credential_provider: CredentialProviderConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub uninstall: UninstallConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialProviderConfig {
    Ssm(SsmConfig),
    IamRolesAnywhere(IamRolesAnywhereConfig),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SsmConfig {
    pub role: String,
}

/// When both CA paths are missing a throwaway self-signed CA is generated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IamRolesAnywhereConfig {
    pub node_name: String,
    pub role_arn: String,
    pub trust_anchor_arn: String,
    pub profile_arn: String,
    pub ca_cert_path: Option<PathBuf>,
    pub ca_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactsConfig {
    #[serde(deserialize_with = "deserialize_duration", default = "default_url_ttl")]
    pub url_ttl: Duration,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            url_ttl: DEFAULT_URL_TTL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandsConfig {
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_command_poll_interval"
    )]
    pub poll_interval: Duration,
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_command_timeout"
    )]
    pub timeout: Duration,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_COMMAND_POLL_INTERVAL,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UninstallConfig {
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_uninstall_poll_interval"
    )]
    pub poll_interval: Duration,
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_uninstall_timeout"
    )]
    pub timeout: Duration,
}

impl Default for UninstallConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_DEREGISTRATION_POLL_INTERVAL,
            timeout: DEFAULT_UNINSTALL_TIMEOUT,
        }
    }
}

fn default_url_ttl() -> Duration {
    DEFAULT_URL_TTL
}

fn default_command_poll_interval() -> Duration {
    DEFAULT_COMMAND_POLL_INTERVAL
}

fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

fn default_uninstall_poll_interval() -> Duration {
    DEFAULT_DEREGISTRATION_POLL_INTERVAL
}

fn default_uninstall_timeout() -> Duration {
    DEFAULT_UNINSTALL_TIMEOUT
}

impl E2eConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.name.is_empty() || self.cluster.region.is_empty() {
            return Err(ConfigError::Invalid(
                "`cluster.name` and `cluster.region` are required".to_string(),
            ));
        }
        match &self.credential_provider {
            CredentialProviderConfig::Ssm(ssm) if ssm.role.is_empty() => {
                return Err(ConfigError::Invalid(
                    "`credential_provider.ssm.role` cannot be empty".to_string(),
                ));
            }
            CredentialProviderConfig::IamRolesAnywhere(iam_ra)
                if iam_ra.ca_cert_path.is_some() != iam_ra.ca_key_path.is_some() =>
            {
                return Err(ConfigError::Invalid(
                    "`ca_cert_path` and `ca_key_path` must be set together".to_string(),
                ));
            }
            _ => {}
        }
        if self.artifacts.url_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "`artifacts.url_ttl` must be greater than zero".to_string(),
            ));
        }
        if self.commands.poll_interval.is_zero() || self.uninstall.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the configured credential provider. SSM operations go through `client`.
    pub fn credential_provider<C>(&self, client: C) -> Result<CredentialProviders<C>, ConfigError>
    where
        C: ActivationRegistrar + ManagedInstanceRegistry,
    {
        match &self.credential_provider {
            CredentialProviderConfig::Ssm(ssm) => Ok(SsmProvider::new(client, &ssm.role)
                .with_poll_interval(self.uninstall.poll_interval)
                .into()),
            CredentialProviderConfig::IamRolesAnywhere(iam_ra) => {
                let ca = iam_ra.certificate_authority()?;
                Ok(IamRolesAnywhereProvider::try_new(
                    &iam_ra.node_name,
                    &iam_ra.role_arn,
                    &iam_ra.trust_anchor_arn,
                    &iam_ra.profile_arn,
                    Arc::new(ca),
                )?
                .into())
            }
        }
    }
}

impl IamRolesAnywhereConfig {
    pub fn certificate_authority(&self) -> Result<CertificateAuthority, ConfigError> {
        match (&self.ca_cert_path, &self.ca_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = read(cert_path)?;
                let key = read(key_path)?;
                Ok(CertificateAuthority::from_pem(&cert, &key)?)
            }
            _ => {
                info!("no CA configured, generating a self-signed one");
                Ok(CertificateAuthority::self_signed(SELF_SIGNED_CA_NAME)?)
            }
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

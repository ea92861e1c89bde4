//! Commands driving `nodeadm` on a test instance.
use crate::credentials::CredentialProviderName;

pub mod config;
pub mod uninstall;

/// Where the `nodeadm` binary is downloaded to on the instance.
pub const NODEADM_PATH: &str = "/tmp/nodeadm";
/// Where the `NodeConfig` is written to on the instance.
pub const NODE_CONFIG_PATH: &str = "/nodeadm-config.yaml";

pub fn install_command(kubernetes_version: &str, provider: CredentialProviderName) -> String {
    format!("{NODEADM_PATH} install {kubernetes_version} --credential-provider {provider}")
}

pub fn init_command(config_path: &str) -> String {
    format!("{NODEADM_PATH} init -c file://{config_path}")
}

// TODO: drop the validation skips once nodes are cordoned and drained before uninstalling.
pub fn uninstall_commands() -> Vec<String> {
    vec![format!("sudo {NODEADM_PATH} uninstall -skip node-validation,pod-validation")]
}

/// Boot script downloading `nodeadm` from `nodeadm_url` and joining the node with `node_config`.
pub fn user_data(
    nodeadm_url: &str,
    node_config: &str,
    kubernetes_version: &str,
    provider: CredentialProviderName,
) -> String {
    format!(
        r#"#!/bin/bash
set -euo pipefail

echo "Downloading nodeadm binary"
curl -fL "{nodeadm_url}" -o {NODEADM_PATH}
chmod +x {NODEADM_PATH}

echo "Writing NodeConfig"
cat <<'EOF' > {NODE_CONFIG_PATH}
{node_config}EOF

echo "Installing kubernetes components"
{install}

echo "Initializing the node"
{init}
"#,
        install = install_command(kubernetes_version, provider),
        init = init_command(NODE_CONFIG_PATH),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_uses_provider_name() {
        assert_eq!(
            install_command("1.30", CredentialProviderName::IamRolesAnywhere),
            "/tmp/nodeadm install 1.30 --credential-provider iam-ra"
        );
        assert_eq!(
            install_command("1.29", CredentialProviderName::Ssm),
            "/tmp/nodeadm install 1.29 --credential-provider ssm"
        );
    }

    #[test]
    fn init_reads_config_file() {
        assert_eq!(
            init_command(NODE_CONFIG_PATH),
            "/tmp/nodeadm init -c file:///nodeadm-config.yaml"
        );
    }

    #[test]
    fn uninstall_runs_the_installed_binary() {
        assert_eq!(
            uninstall_commands(),
            vec!["sudo /tmp/nodeadm uninstall -skip node-validation,pod-validation"]
        );
    }

    #[test]
    fn user_data_embeds_config_verbatim() {
        let config = "apiVersion: node.eks.aws/v1alpha1\nkind: NodeConfig\n";
        let script = user_data(
            "https://bucket.s3.amazonaws.com/nodeadm?X-Amz-Signature=abc",
            config,
            "1.30",
            CredentialProviderName::Ssm,
        );

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains(concat!(
            "curl -fL \"https://bucket.s3.amazonaws.com/nodeadm?X-Amz-Signature=abc\"",
            " -o /tmp/nodeadm"
        )));
        assert!(script.contains(&format!("cat <<'EOF' > /nodeadm-config.yaml\n{config}EOF\n")));
        assert!(script.contains("/tmp/nodeadm install 1.30 --credential-provider ssm\n"));
        assert!(script.ends_with("/tmp/nodeadm init -c file:///nodeadm-config.yaml\n"));
    }
}

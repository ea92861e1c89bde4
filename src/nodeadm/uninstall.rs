//! `nodeadm uninstall` flow.
//!
//! On SSM nodes uninstalling deregisters the managed instance, which kills the agent reporting
//! the status of the very command being run. That command can then end up as `Failed` even
//! though it did its job, so for SSM the registry is the source of truth.
use thiserror::Error;
use tracing::{info, warn};

use super::uninstall_commands;
use crate::{
    context::Context,
    credentials::{CredentialProviderName, HybridNode, NodeadmCredentialsProvider, ProviderError},
    ssm::command::{CommandChannel, CommandError, CommandStatus, RemoteCommandRunner},
};

#[derive(Error, Debug)]
pub enum NodeadmUninstallError {
    #[error("running nodeadm uninstall: {0}")]
    Command(#[from] CommandError),

    #[error("verifying nodeadm uninstall: {0}")]
    Verification(#[from] ProviderError),
}

/// Uninstalls `nodeadm` from `node` and waits until `provider` confirms the teardown.
///
/// `runner` is expected to use [crate::ssm::command::CompletionPolicy::InProgressAcceptable].
pub fn run_nodeadm_uninstall<C, P>(
    ctx: &Context,
    runner: &RemoteCommandRunner<C>,
    provider: &P,
    node: &HybridNode,
) -> Result<(), NodeadmUninstallError>
where
    C: CommandChannel,
    P: NodeadmCredentialsProvider,
{
    let instance_id = provider.instance_id(node);
    info!(instance_id, provider = %provider.name(), "uninstalling nodeadm");

    match runner.run(ctx, instance_id, &uninstall_commands()) {
        Ok(outcomes) => {
            for outcome in outcomes {
                info!(
                    instance_id,
                    status = %outcome.status,
                    output = %outcome.output,
                    "nodeadm uninstall"
                );
            }
        }
        Err(CommandError::UnexpectedStatus {
            status: CommandStatus::Failed,
            output,
            ..
        }) if provider.name() == CredentialProviderName::Ssm => {
            warn!(
                instance_id,
                output = %output,
                "nodeadm uninstall reported `Failed`, checking deregistration instead"
            );
        }
        Err(err) => return Err(err.into()),
    }

    provider.verify_uninstall(ctx, instance_id)?;
    info!(instance_id, "nodeadm uninstalled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use assert_matches::assert_matches;
    use mockall::{predicate, Sequence};
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        credentials::{tests::MockSsmApi, IamRolesAnywhereProvider, SsmProvider},
        pki::tests::test_ca,
        ssm::{
            command::{tests::MockCommandChannel, CompletionPolicy},
            instance::UninstallError,
        },
    };

    const UNINSTALL: &str = "sudo /tmp/nodeadm uninstall -skip node-validation,pod-validation";

    fn node() -> HybridNode {
        HybridNode {
            instance_id: "i-0123456789abcdef0".to_string(),
            node_name: "mi-0123456789abcdef0".to_string(),
        }
    }

    fn runner(channel: MockCommandChannel) -> RemoteCommandRunner<MockCommandChannel> {
        RemoteCommandRunner::new(channel, CompletionPolicy::InProgressAcceptable)
            .with_poll_interval(Duration::from_millis(1))
    }

    fn ssm_provider(deregistered: bool) -> SsmProvider<MockSsmApi> {
        let mut api = MockSsmApi::new();
        api.expect_is_managed_instance()
            .with(predicate::eq("mi-0123456789abcdef0".to_string()))
            .returning(move |_| Ok(!deregistered));
        SsmProvider::new(api, "arn:aws:iam::123:role/x")
            .with_poll_interval(Duration::from_millis(1))
    }

    fn iam_ra_provider() -> IamRolesAnywhereProvider {
        IamRolesAnywhereProvider::try_new(
            "hybrid-node-1",
            "arn:aws:iam::123:role/ira",
            "arn:aws:rolesanywhere:us-west-2:123:trust-anchor/ta",
            "arn:aws:rolesanywhere:us-west-2:123:profile/p",
            Arc::new(test_ca()),
        )
        .unwrap()
    }

    #[test]
    #[traced_test]
    fn ssm_failed_status_is_tolerated_when_deregistered() {
        let mut seq = Sequence::new();
        let mut channel = MockCommandChannel::new();
        channel.should_send_command("mi-0123456789abcdef0", UNINSTALL, "cmd-1", &mut seq);
        channel.should_report_statuses("cmd-1", vec![CommandStatus::Failed], &mut seq);

        let ctx = Context::new().with_timeout(Duration::from_secs(10));
        run_nodeadm_uninstall(&ctx, &runner(channel), &ssm_provider(true), &node()).unwrap();

        assert!(logs_contain("nodeadm uninstall reported `Failed`"));
        assert!(logs_contain("nodeadm uninstalled"));
    }

    #[test]
    fn ssm_failed_status_still_requires_deregistration() {
        let mut seq = Sequence::new();
        let mut channel = MockCommandChannel::new();
        channel.should_send_command("mi-0123456789abcdef0", UNINSTALL, "cmd-1", &mut seq);
        channel.should_report_statuses("cmd-1", vec![CommandStatus::Failed], &mut seq);

        let ctx = Context::new().with_timeout(Duration::from_millis(50));
        let err = run_nodeadm_uninstall(&ctx, &runner(channel), &ssm_provider(false), &node())
            .unwrap_err();

        assert_matches!(
            err,
            NodeadmUninstallError::Verification(ProviderError::Uninstall {
                source: UninstallError::Timeout(id),
                ..
            }) => assert_eq!(id, "mi-0123456789abcdef0")
        );
    }

    #[test]
    fn ssm_other_terminal_statuses_are_errors() {
        let mut seq = Sequence::new();
        let mut channel = MockCommandChannel::new();
        channel.should_send_command("mi-0123456789abcdef0", UNINSTALL, "cmd-1", &mut seq);
        channel.should_report_statuses("cmd-1", vec![CommandStatus::TimedOut], &mut seq);

        let err = run_nodeadm_uninstall(
            &Context::new(),
            &runner(channel),
            &ssm_provider(true),
            &node(),
        )
        .unwrap_err();

        assert_matches!(
            err,
            NodeadmUninstallError::Command(CommandError::UnexpectedStatus {
                status: CommandStatus::TimedOut,
                position: 1,
                ..
            })
        );
    }

    #[test]
    fn ssm_in_progress_is_enough() {
        let mut seq = Sequence::new();
        let mut channel = MockCommandChannel::new();
        channel.should_send_command("mi-0123456789abcdef0", UNINSTALL, "cmd-1", &mut seq);
        channel.should_report_statuses(
            "cmd-1",
            vec![CommandStatus::Pending, CommandStatus::InProgress],
            &mut seq,
        );

        run_nodeadm_uninstall(
            &Context::new(),
            &runner(channel),
            &ssm_provider(true),
            &node(),
        )
        .unwrap();
    }

    #[test]
    fn iam_ra_failed_status_is_an_error() {
        let mut seq = Sequence::new();
        let mut channel = MockCommandChannel::new();
        channel.should_send_command("i-0123456789abcdef0", UNINSTALL, "cmd-1", &mut seq);
        channel.should_report_statuses("cmd-1", vec![CommandStatus::Failed], &mut seq);

        let err = run_nodeadm_uninstall(
            &Context::new(),
            &runner(channel),
            &iam_ra_provider(),
            &node(),
        )
        .unwrap_err();

        assert_matches!(
            err,
            NodeadmUninstallError::Command(CommandError::UnexpectedStatus {
                status: CommandStatus::Failed,
                ..
            })
        );
    }

    #[test]
    fn iam_ra_targets_ec2_instance() {
        let mut seq = Sequence::new();
        let mut channel = MockCommandChannel::new();
        channel.should_send_command("i-0123456789abcdef0", UNINSTALL, "cmd-1", &mut seq);
        channel.should_report_statuses("cmd-1", vec![CommandStatus::Success], &mut seq);

        run_nodeadm_uninstall(
            &Context::new(),
            &runner(channel),
            &iam_ra_provider(),
            &node(),
        )
        .unwrap();
    }
}

use std::{fmt, sync::Arc};

use aws_config::SdkConfig;
use aws_sdk_ssm::{error::DisplayErrorContext, types::InstanceInformationStringFilter, Client};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::ssm::{
    activation::{Activation, ActivationRegistrar, RegistrationError},
    command::{
        ChannelError, CommandChannel, CommandInvocation, CommandStatus, RUN_SHELL_SCRIPT_DOCUMENT,
    },
    instance::{ManagedInstanceRegistry, RegistryError},
};

const INSTANCE_IDS_FILTER: &str = "InstanceIds";
const COMMANDS_PARAMETER: &str = "commands";

/// Provides a _sync_ implementation of the SSM operations needed by the credential providers
/// and the remote command runner.
pub struct SyncSsmClient {
    client: Client,
    runtime: Arc<Runtime>,
}

impl fmt::Debug for SyncSsmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSsmClient")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

impl SyncSsmClient {
    pub fn new(runtime: Arc<Runtime>, config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
            runtime,
        }
    }
}

impl ActivationRegistrar for SyncSsmClient {
    fn register_activation(&self, role: &str, name: &str) -> Result<Activation, RegistrationError> {
        let output = self
            .runtime
            .block_on(
                self.client
                    .create_activation()
                    .iam_role(role)
                    .default_instance_name(name)
                    .registration_limit(1)
                    .send(),
            )
            .map_err(|err| RegistrationError::Broker(DisplayErrorContext(&err).to_string()))?;

        Ok(Activation {
            id: output
                .activation_id()
                .ok_or(RegistrationError::MissingField("activation id"))?
                .to_string(),
            code: output
                .activation_code()
                .ok_or(RegistrationError::MissingField("activation code"))?
                .to_string(),
        })
    }
}

impl ManagedInstanceRegistry for SyncSsmClient {
    fn is_managed_instance(&self, instance_id: &str) -> Result<bool, RegistryError> {
        let filter = InstanceInformationStringFilter::builder()
            .key(INSTANCE_IDS_FILTER)
            .values(instance_id)
            .build()
            .map_err(|err| RegistryError(err.to_string()))?;

        let result = self.runtime.block_on(
            self.client
                .describe_instance_information()
                .filters(filter)
                .send(),
        );
        match result {
            Ok(output) => Ok(!output.instance_information_list().is_empty()),
            // Deregistered instances can be reported as unknown ids instead of an empty list.
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|err| err.is_invalid_instance_id()) =>
            {
                debug!(instance_id, "unknown managed instance id");
                Ok(false)
            }
            Err(err) => Err(RegistryError(DisplayErrorContext(&err).to_string())),
        }
    }
}

impl CommandChannel for SyncSsmClient {
    fn send_command(&self, instance_id: &str, commands: &[String]) -> Result<String, ChannelError> {
        let output = self
            .runtime
            .block_on(
                self.client
                    .send_command()
                    .instance_ids(instance_id)
                    .document_name(RUN_SHELL_SCRIPT_DOCUMENT)
                    .parameters(COMMANDS_PARAMETER, commands.to_vec())
                    .send(),
            )
            .map_err(|err| ChannelError(DisplayErrorContext(&err).to_string()))?;

        output
            .command()
            .and_then(|command| command.command_id())
            .map(str::to_string)
            .ok_or_else(|| {
                ChannelError("SendCommand response is missing the command id".to_string())
            })
    }

    fn list_command_invocations(
        &self,
        command_id: &str,
    ) -> Result<Vec<CommandInvocation>, ChannelError> {
        let output = self
            .runtime
            .block_on(
                self.client
                    .list_command_invocations()
                    .command_id(command_id)
                    .details(true)
                    .send(),
            )
            .map_err(|err| ChannelError(DisplayErrorContext(&err).to_string()))?;

        Ok(output
            .command_invocations()
            .iter()
            .map(|invocation| CommandInvocation {
                status: invocation
                    .status()
                    .map(|status| CommandStatus::from(status.as_str()))
                    .unwrap_or(CommandStatus::Pending),
                output: invocation
                    .command_plugins()
                    .iter()
                    .filter_map(|plugin| plugin.output())
                    .collect::<Vec<_>>()
                    .join("\n"),
            })
            .collect())
    }
}

//! Remote command execution through the SSM Run Command channel.
//!
//! Test instances are not reachable through SSH, so every lifecycle action (installing,
//! inspecting or uninstalling `nodeadm`) is sent as an `AWS-RunShellScript` document and its
//! invocation status is polled until the configured [CompletionPolicy] is satisfied.
use std::{fmt, time::Duration};

use thiserror::Error;
use tracing::{debug, info};

use crate::context::{Context, ContextError};

pub const RUN_SHELL_SCRIPT_DOCUMENT: &str = "AWS-RunShellScript";
pub const DEFAULT_COMMAND_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ChannelError(pub String);

/// Errors of [RemoteCommandRunner]. Positions are 1-based, in submission order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("sending command #{position} `{command}` to `{instance_id}`: {source}")]
    Submission {
        instance_id: String,
        position: usize,
        command: String,
        #[source]
        source: ChannelError,
    },

    #[error(
        "listing invocations of command #{position} (`{command_id}`) on `{instance_id}`: {source}"
    )]
    Invocation {
        instance_id: String,
        position: usize,
        command_id: String,
        #[source]
        source: ChannelError,
    },

    #[error(
        "command #{position} `{command}` on `{instance_id}` finished with status `{status}`: \
         {output}"
    )]
    UnexpectedStatus {
        instance_id: String,
        position: usize,
        command: String,
        status: CommandStatus,
        output: String,
    },

    #[error(
        "timed out waiting for command #{position} `{command}` on `{instance_id}`, \
         last status `{status}`"
    )]
    Timeout {
        instance_id: String,
        position: usize,
        command: String,
        status: CommandStatus,
    },

    #[error("cancelled while running command #{position} `{command}` on `{instance_id}`")]
    Cancelled {
        instance_id: String,
        position: usize,
        command: String,
    },
}

/// Status of a command invocation as reported by SSM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    InProgress,
    Delayed,
    Success,
    Cancelling,
    Cancelled,
    TimedOut,
    Failed,
    /// Any status this crate doesn't know about. Considered terminal.
    Unknown(String),
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Cancelled | Self::TimedOut | Self::Failed | Self::Unknown(_)
        )
    }
}

impl From<&str> for CommandStatus {
    fn from(value: &str) -> Self {
        match value {
            "Pending" => Self::Pending,
            "InProgress" => Self::InProgress,
            "Delayed" => Self::Delayed,
            "Success" => Self::Success,
            "Cancelling" => Self::Cancelling,
            "Cancelled" => Self::Cancelled,
            "TimedOut" => Self::TimedOut,
            "Failed" => Self::Failed,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Delayed => "Delayed",
            Self::Success => "Success",
            Self::Cancelling => "Cancelling",
            Self::Cancelled => "Cancelled",
            Self::TimedOut => "TimedOut",
            Self::Failed => "Failed",
            Self::Unknown(status) => status,
        };
        f.write_str(status)
    }
}

/// Status and captured output of one invocation of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub status: CommandStatus,
    pub output: String,
}

/// Outcome of one submitted command line. Outcomes are returned in submission order.
pub type CommandOutcome = CommandInvocation;

/// Managed-command channel targeting SSM managed instances.
pub trait CommandChannel {
    /// Submits `commands` as a single shell script on `instance_id`, returning the command id.
    fn send_command(&self, instance_id: &str, commands: &[String]) -> Result<String, ChannelError>;

    /// Lists the invocations of `command_id`. It can be empty right after submission.
    fn list_command_invocations(
        &self,
        command_id: &str,
    ) -> Result<Vec<CommandInvocation>, ChannelError>;
}

impl<T> CommandChannel for &T
where
    T: CommandChannel + ?Sized,
{
    fn send_command(&self, instance_id: &str, commands: &[String]) -> Result<String, ChannelError> {
        (**self).send_command(instance_id, commands)
    }

    fn list_command_invocations(
        &self,
        command_id: &str,
    ) -> Result<Vec<CommandInvocation>, ChannelError> {
        (**self).list_command_invocations(command_id)
    }
}

/// When a submitted command is considered complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// Wait for `Success`; any other terminal status is an error.
    #[default]
    Terminal,
    /// Stop waiting once the command is `InProgress` or `Success`.
    ///
    /// Meant for commands that tear down the agent reporting their own status, such as
    /// `nodeadm uninstall` on SSM nodes.
    InProgressAcceptable,
}

enum Completion {
    Done,
    Failed,
    Waiting,
}

impl CompletionPolicy {
    fn evaluate(&self, status: &CommandStatus) -> Completion {
        match (self, status) {
            (_, CommandStatus::Success) => Completion::Done,
            (Self::InProgressAcceptable, CommandStatus::InProgress) => Completion::Done,
            (_, status) if status.is_terminal() => Completion::Failed,
            _ => Completion::Waiting,
        }
    }
}

/// Runs shell commands on an instance through a [CommandChannel], one command line at a time.
pub struct RemoteCommandRunner<C>
where
    C: CommandChannel,
{
    channel: C,
    policy: CompletionPolicy,
    poll_interval: Duration,
    command_timeout: Option<Duration>,
}

impl<C> RemoteCommandRunner<C>
where
    C: CommandChannel,
{
    pub fn new(channel: C, policy: CompletionPolicy) -> Self {
        Self {
            channel,
            policy,
            poll_interval: DEFAULT_COMMAND_POLL_INTERVAL,
            command_timeout: None,
        }
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }

    /// Bounds the wait of each command, on top of the caller's context deadline.
    pub fn with_command_timeout(self, command_timeout: Duration) -> Self {
        Self {
            command_timeout: Some(command_timeout),
            ..self
        }
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    /// Runs `commands` in order on `instance_id`, stopping at the first one that fails.
    ///
    /// On success the returned outcomes match `commands` one to one.
    pub fn run(
        &self,
        ctx: &Context,
        instance_id: &str,
        commands: &[String],
    ) -> Result<Vec<CommandOutcome>, CommandError> {
        let mut outcomes = Vec::with_capacity(commands.len());
        for (index, command) in commands.iter().enumerate() {
            let position = index + 1;
            if let Some(err) = ctx.err() {
                return Err(interrupted(
                    err,
                    instance_id,
                    position,
                    command,
                    CommandStatus::Pending,
                ));
            }

            let command_id = self
                .channel
                .send_command(instance_id, std::slice::from_ref(command))
                .map_err(|source| CommandError::Submission {
                    instance_id: instance_id.to_string(),
                    position,
                    command: command.clone(),
                    source,
                })?;
            info!(instance_id, position, command_id = %command_id, "command submitted");

            let command_ctx = match self.command_timeout {
                Some(timeout) => ctx.with_timeout(timeout),
                None => ctx.clone(),
            };
            let outcome =
                self.wait_for_command(&command_ctx, instance_id, position, command, &command_id)?;
            info!(instance_id, position, status = %outcome.status, "command completed");
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn wait_for_command(
        &self,
        ctx: &Context,
        instance_id: &str,
        position: usize,
        command: &str,
        command_id: &str,
    ) -> Result<CommandOutcome, CommandError> {
        let mut last_status = CommandStatus::Pending;
        loop {
            let invocations = self
                .channel
                .list_command_invocations(command_id)
                .map_err(|source| CommandError::Invocation {
                    instance_id: instance_id.to_string(),
                    position,
                    command_id: command_id.to_string(),
                    source,
                })?;

            // A single instance is targeted, so there is at most one invocation.
            match invocations.into_iter().next() {
                None => debug!(command_id, "command invocation not listed yet"),
                Some(invocation) => {
                    debug!(command_id, status = %invocation.status, "command invocation status");
                    match self.policy.evaluate(&invocation.status) {
                        Completion::Done => return Ok(invocation),
                        Completion::Failed => {
                            return Err(CommandError::UnexpectedStatus {
                                instance_id: instance_id.to_string(),
                                position,
                                command: command.to_string(),
                                status: invocation.status,
                                output: invocation.output,
                            })
                        }
                        Completion::Waiting => last_status = invocation.status,
                    }
                }
            }

            ctx.wait(self.poll_interval).map_err(|err| {
                interrupted(err, instance_id, position, command, last_status.clone())
            })?;
        }
    }
}

fn interrupted(
    err: ContextError,
    instance_id: &str,
    position: usize,
    command: &str,
    status: CommandStatus,
) -> CommandError {
    match err {
        ContextError::Cancelled => CommandError::Cancelled {
            instance_id: instance_id.to_string(),
            position,
            command: command.to_string(),
        },
        ContextError::DeadlineExceeded => CommandError::Timeout {
            instance_id: instance_id.to_string(),
            position,
            command: command.to_string(),
            status,
        },
    }
}

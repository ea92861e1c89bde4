//! Entry point of the EKS hybrid nodes e2e provisioning tool.
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use eks_hybrid_e2e::{
    artifact::{ArtifactLocator, ObjectLocation},
    aws::{load_sdk_config, SyncS3Client, SyncSsmClient},
    cli::{Cli, Command, NodeConfigArgs, PresignArgs, RunCommandsArgs, UninstallArgs},
    config::E2eConfig,
    context::Context,
    credentials::{HybridNode, NodeadmCredentialsProvider},
    logging::Logging,
    nodeadm::{config::File, uninstall::run_nodeadm_uninstall},
    ssm::command::{CompletionPolicy, RemoteCommandRunner},
};
use tokio::runtime::Runtime;
use tracing::{error, info, trace};

fn main() -> ExitCode {
    let cli = Cli::init();

    if let Err(err) = Logging::try_init(cli.log_level) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match _main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Separated from [main] so errors are logged once, in string format.
fn _main(cli: Cli) -> Result<(), Box<dyn Error>> {
    let ctx = Context::new();
    trace!("creating the signal handler");
    create_shutdown_signal_handler(ctx.clone())?;

    match cli.command {
        Command::Presign(args) => presign(args),
        Command::NodeConfig(args) => node_config(args),
        Command::RunCommands(args) => run_commands(&ctx, args),
        Command::Uninstall(args) => uninstall(&ctx, args),
    }
}

/// Cancels `ctx` on Ctrl-C, interrupting any ongoing wait.
fn create_shutdown_signal_handler(ctx: Context) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("Received SIGINT (Ctrl-C). Cancelling");
        ctx.cancel();
    })
    .inspect_err(|e| error!("Could not set signal handler: {e}"))
}

fn presign(args: PresignArgs) -> Result<(), Box<dyn Error>> {
    // Malformed locators fail before touching AWS.
    args.locator.parse::<ObjectLocation>()?;

    let runtime = Arc::new(Runtime::new()?);
    let sdk_config = load_sdk_config(&runtime, &args.region);
    let locator = ArtifactLocator::new(SyncS3Client::new(runtime, &sdk_config));

    println!("{}", locator.presigned_url(&args.locator, args.ttl)?);
    Ok(())
}

fn node_config(args: NodeConfigArgs) -> Result<(), Box<dyn Error>> {
    let config = E2eConfig::load(&args.config)?;
    let runtime = Arc::new(Runtime::new()?);
    let sdk_config = load_sdk_config(&runtime, &config.cluster.region);
    let provider = config.credential_provider(SyncSsmClient::new(runtime, &sdk_config))?;

    let node_config = provider.nodeadm_config(&config.cluster)?;
    let files = provider.files_for_node()?;

    if let Some(output_dir) = args.output_dir {
        for file in &files {
            let path = write_node_file(&output_dir, file)?;
            info!(path = %path.display(), "node file written");
        }
    } else if !files.is_empty() {
        info!(
            count = files.len(),
            "node files were not written, use `--output-dir` to keep them"
        );
    }

    print!("{}", node_config.to_yaml()?);
    Ok(())
}

fn run_commands(ctx: &Context, args: RunCommandsArgs) -> Result<(), Box<dyn Error>> {
    let config = E2eConfig::load(&args.config)?;
    let runtime = Arc::new(Runtime::new()?);
    let sdk_config = load_sdk_config(&runtime, &config.cluster.region);

    let runner = RemoteCommandRunner::new(
        SyncSsmClient::new(runtime, &sdk_config),
        CompletionPolicy::from(args.wait),
    )
    .with_poll_interval(config.commands.poll_interval)
    .with_command_timeout(config.commands.timeout);

    let outcomes = runner.run(ctx, &args.instance_id, &args.commands)?;
    for (command, outcome) in args.commands.iter().zip(outcomes) {
        println!("$ {command}\n[{}]\n{}", outcome.status, outcome.output);
    }
    Ok(())
}

fn uninstall(ctx: &Context, args: UninstallArgs) -> Result<(), Box<dyn Error>> {
    let config = E2eConfig::load(&args.config)?;
    let runtime = Arc::new(Runtime::new()?);
    let sdk_config = load_sdk_config(&runtime, &config.cluster.region);

    let provider = config.credential_provider(SyncSsmClient::new(runtime.clone(), &sdk_config))?;
    let runner = RemoteCommandRunner::new(
        SyncSsmClient::new(runtime, &sdk_config),
        CompletionPolicy::InProgressAcceptable,
    )
    .with_poll_interval(config.commands.poll_interval)
    .with_command_timeout(config.commands.timeout);

    let node = HybridNode {
        instance_id: args.instance_id,
        node_name: args.node_name,
    };
    let ctx = ctx.with_timeout(config.uninstall.timeout);
    run_nodeadm_uninstall(&ctx, &runner, &provider, &node)?;
    Ok(())
}

/// Writes `file` below `output_dir`, keeping its absolute path.
fn write_node_file(output_dir: &Path, file: &File) -> Result<PathBuf, std::io::Error> {
    let relative = file.path.strip_prefix("/").unwrap_or(&file.path);
    let path = output_dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, &file.content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(path)
}

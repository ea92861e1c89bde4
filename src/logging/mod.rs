use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInitError(String),
}

pub struct Logging;

impl Logging {
    /// Installs the global subscriber. `RUST_LOG` directives take precedence over `level`.
    pub fn try_init(level: LevelFilter) -> Result<(), LoggingError> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(level.into())
                    .from_env_lossy(),
            )
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| LoggingError::TryInitError(err.to_string()))
    }
}

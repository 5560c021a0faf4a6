use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{MediaCommand, MediaExecutor};
use crate::error::Result;
use crate::process::Runner;

/// Executor that spawns each command as a child process
pub struct ProcessExecutor {
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self { cancel, timeout }
    }

    fn runner(&self, command: &MediaCommand) -> Runner {
        let runner = Runner::new(&command.binary_path, command.args.iter().cloned())
            .cancel_token(self.cancel.clone())
            .timeout(self.timeout);

        match &command.working_dir {
            Some(dir) => runner.current_dir(dir),
            None => runner,
        }
    }
}

#[async_trait]
impl MediaExecutor for ProcessExecutor {
    async fn run(&self, command: &MediaCommand) -> Result<()> {
        info!("Running {}: {}", command.description, command.binary_path);
        self.runner(command).run().await
    }

    async fn capture(&self, command: &MediaCommand) -> Result<String> {
        info!("Running {}: {}", command.description, command.binary_path);
        self.runner(command).capture_stdout().await
    }
}

// External tool invocation
//
// - Commands: argument vectors for every transcoder and diagnostic call
// - Processor: executes commands as child processes

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use commands::*;
pub use processor::*;

use crate::config::PipelineConfig;
use crate::error::Result;

/// Executes media commands. Implementations decide how the external tool is reached.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaExecutor: Send + Sync {
    /// Run the command to completion, succeeding only on exit status 0
    async fn run(&self, command: &MediaCommand) -> Result<()>;

    /// Run the command to completion and return its standard output
    async fn capture(&self, command: &MediaCommand) -> Result<String>;
}

/// Factory for creating executor instances
pub struct MediaExecutorFactory;

impl MediaExecutorFactory {
    /// Create the default executor, running real child processes
    pub fn create_executor(
        pipeline: &PipelineConfig,
        cancel: CancellationToken,
    ) -> Box<dyn MediaExecutor> {
        Box::new(ProcessExecutor::new(cancel, pipeline.process_timeout()))
    }
}

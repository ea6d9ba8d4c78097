pub mod config;
pub mod pipeline;
pub mod runner;
pub mod tasks;
pub mod tools;

#[cfg(test)]
mod tests;

pub use config::{ReleaseConfig, ReleaseOptions, ReleaseOverrides, TaskSpec};
pub use pipeline::{ReleasePipeline, Step, StepOutcome, StepReport};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use tasks::TaskRunner;
pub use tools::{find_tool, install_hint, tool_info, ToolInfo, KNOWN_TOOLS};

mod checks;
mod commands;
mod config_cmd;
mod forward;
mod release;
mod up;
mod utils;

pub use checks::{reclaim_ports, run_checks};
pub use commands::{Cli, Commands};
pub use config_cmd::handle_config;
pub use forward::run_forwarder;
pub use release::{run_build_push, run_task};
pub use up::run_up;
pub use utils::{init_logging, show_version};

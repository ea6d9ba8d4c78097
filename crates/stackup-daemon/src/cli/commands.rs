use clap::{Parser, Subcommand};
use stackup_daemon::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "stackup")]
#[command(version = BUILD_VERSION)]
#[command(about = "stackup - Local development stack supervisor")]
#[command(long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        env = "STACKUP_CONFIG",
        default_value = DEFAULT_CONFIG_FILE,
        help = "Path to the stack file"
    )]
    pub config: PathBuf,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase verbosity (-v, -vv, -vvv)")]
    pub verbose: u8,

    #[arg(short, long, global = true, help = "Only show warnings and errors")]
    pub quiet: bool,

    #[arg(long, global = true, value_name = "FILE", help = "Write logs to file")]
    pub log_file: Option<PathBuf>,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Start the local stack")]
    #[command(long_about = "Start every declared process in dependency order.\n\nPorts are reclaimed before each process starts, and the telemetry forwarder runs alongside unless disabled. Ctrl+C stops everything.")]
    Up {
        #[arg(long, value_name = "NAME", num_args = 1.., help = "Start only these processes and what they depend on")]
        only: Vec<String>,
        #[arg(long, help = "Do not start the telemetry forwarder")]
        no_telemetry: bool,
    },

    #[command(about = "Run only the telemetry forwarder")]
    Forward,

    #[command(about = "Install, type-check and build every package")]
    Build,

    #[command(about = "Build the backend bundle")]
    BuildBackend,

    #[command(about = "Build the backend image locally")]
    DockerBuild,

    #[command(about = "Run the locally built image")]
    DockerRun,

    #[command(about = "Open the workspace dependency graph")]
    NxGraph,

    #[command(about = "Build, tag and push the release image")]
    #[command(long_about = "Compile, build the image under a short and a fully qualified tag, log in to the registry and push.\n\nStops at the first failing step.")]
    BuildPush {
        #[arg(long, help = "Refresh the kargo warehouse after the push")]
        trigger_kargo: bool,
        #[arg(long, help = "Skip the compile step")]
        skip_build: bool,
        #[arg(long, help = "Fail instead of relying on an existing docker login session")]
        require_login: bool,
        #[arg(long, value_name = "HOST", help = "Image registry")]
        registry: Option<String>,
        #[arg(long, value_name = "OWNER", help = "Registry owner or organisation")]
        owner: Option<String>,
        #[arg(long, value_name = "NAME", help = "Image name")]
        image: Option<String>,
        #[arg(long, value_name = "NAME", help = "Kargo warehouse")]
        warehouse: Option<String>,
        #[arg(long, value_name = "NS", help = "Kargo project namespace")]
        namespace: Option<String>,
        #[arg(value_name = "VERSION", help = "Image tag to release")]
        tag: String,
    },

    #[command(about = "Kill whatever holds the given ports")]
    Reclaim {
        #[arg(value_name = "PORT", required = true)]
        ports: Vec<u16>,
        #[arg(long, help = "Match UDP sockets instead of TCP listeners")]
        udp: bool,
    },

    #[command(about = "Check required tools and ports")]
    Check,

    #[command(about = "Manage the stack file")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    #[command(about = "Show version information")]
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    #[command(about = "Show the effective configuration")]
    Show,
    #[command(about = "Validate the stack file")]
    Validate,
    #[command(about = "Print the built-in stack")]
    Default {
        #[arg(short, long, value_name = "FILE", help = "Write to a file instead of stdout")]
        output: Option<PathBuf>,
    },
}

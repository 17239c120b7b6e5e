use clap::{Parser, ValueEnum};
use mongodb_cluster::config::{
    OperatorConfig, DEFAULT_AGENT_IMAGE, DEFAULT_MONGODB_IMAGE, DEFAULT_VERSION_UPGRADE_HOOK_IMAGE,
};
use mongodb_cluster::controllers::cluster_controller::{self, State};
use mongodb_cluster::util::telemetry::{self, LogFormat};
use tracing::error;

mod handlers;
mod server;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Kubernetes operator for MongoDB replica sets", long_about = None)]
struct Args {
    /// Image running the automation agent next to every mongod
    #[arg(long, env = "AGENT_IMAGE", default_value = DEFAULT_AGENT_IMAGE)]
    agent_image: String,

    /// Image providing the mongod binary
    #[arg(long, env = "MONGODB_IMAGE", default_value = DEFAULT_MONGODB_IMAGE)]
    mongodb_image: String,

    /// Image copying the version upgrade hook into the pod
    #[arg(long, env = "VERSION_UPGRADE_HOOK_IMAGE", default_value = DEFAULT_VERSION_UPGRADE_HOOK_IMAGE)]
    version_upgrade_hook_image: String,

    /// Address of the health and metrics server
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "compact")]
    log_format: LogFormatArg,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(args.log_format.into());

    // Initialize Kubernetes controller state
    let state = State::new(OperatorConfig {
        agent_image: args.agent_image,
        mongodb_image: args.mongodb_image,
        version_upgrade_hook_image: args.version_upgrade_hook_image,
    })?;
    let controller = async {
        cluster_controller::run(state.clone()).await.map_err(|e| {
            error!("controller stopped: {}", e);
            anyhow::Error::from(e)
        })
    };
    let server = server::start_server(state.clone(), &args.bind_address);

    // Both runtimes shut down gracefully, so poll until both are done
    tokio::try_join!(controller, server)?;
    Ok(())
}

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dcf_montecarlo::api::{self, ValuationArgs};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "dcf-montecarlo",
    version,
    about = "Monte Carlo discounted cash flow valuation"
)]
struct Cli {
    /// Used when RUST_LOG is unset.
    #[arg(long, global = true, env = "DCF_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, env = "DCF_HOST", default_value = "127.0.0.1")]
        host: IpAddr,
        #[arg(short, long, env = "DCF_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Run one valuation from flags and print the report as JSON.
    Run(ValuationArgs),
    /// Run one valuation from a JSON file in the API's payload format.
    RunJson { path: PathBuf },
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Command::Serve { host, port } => {
            api::run_http_server(SocketAddr::new(host, port)).await?;
        }
        Command::Run(args) => {
            let report = api::run_cli(args)?;
            println!("{report}");
        }
        Command::RunJson { path } => {
            let payload = std::fs::read_to_string(&path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            let report = api::run_payload_json(&payload)?;
            println!("{report}");
        }
    }

    Ok(())
}

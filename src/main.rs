use clap::{Parser, Subcommand};

use sweepnet::client;
use sweepnet::params::*;
use sweepnet::server::{self, ServerConfig};

#[derive(Parser)]
#[command(name = "sweepnet", version = "1.0.0")]
#[command(about = "sweepnet - a networked multiplayer Minesweeper service")]
struct Cli {
    /// TCP port; negative values are negated
    #[arg(long, default_value_t = DEFAULT_PORT as i32, global = true)]
    port: i32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the game server
    Server {
        /// Credential file (header line, then `username password` rows)
        #[arg(long, default_value = AUTH_FILE)]
        auth_file: String,
        /// Fix the mine layout for testing; omit for random games
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run the terminal client
    Client,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sweepnet=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let port = cli.port.unsigned_abs() as u16;

    let rt = tokio::runtime::Runtime::new().unwrap();
    match cli.command {
        Commands::Server { auth_file, seed } => {
            if let Err(e) = rt.block_on(server::run_server(ServerConfig { port, auth_file, seed })) {
                eprintln!("❌ {}", e);
                std::process::exit(1);
            }
        }
        Commands::Client => {
            if let Err(e) = rt.block_on(client::run_client(port)) {
                eprintln!("❌ {}", e);
                std::process::exit(1);
            }
        }
    }
}

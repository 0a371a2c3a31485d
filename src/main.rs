//! authpipe CLI binary entry point.

use authpipe::cli::{commands, Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("AUTHPIPE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();
    let result = match cli.command {
        Commands::Login(args) => commands::handle_login(args).await,
        Commands::Status => commands::handle_status().await,
        Commands::Logout => commands::handle_logout().await,
        Commands::Request(args) => commands::handle_request(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

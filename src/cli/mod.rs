//! CLI entry point for authpipe.

pub mod commands;

use clap::{Parser, Subcommand};

/// Authenticated API client
#[derive(Parser, Debug)]
#[command(name = "authpipe", version, about = "Call an API with a managed session")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in and store the session
    Login(LoginArgs),
    /// Show the stored session
    Status,
    /// Sign out and remove the stored session
    Logout,
    /// Send an authenticated request
    Request(RequestArgs),
}

/// Arguments for `authpipe login`.
#[derive(Parser, Debug)]
pub struct LoginArgs {
    pub username: String,

    /// Password; read from AUTHPIPE_PASSWORD or stdin when omitted
    #[arg(short, long, env = "AUTHPIPE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

/// Arguments for `authpipe request`.
#[derive(Parser, Debug)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, ...)
    pub method: String,

    /// Path relative to the API base URL, or an absolute URL
    pub path: String,

    /// JSON request body
    #[arg(short, long)]
    pub body: Option<String>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

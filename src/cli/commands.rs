//! CLI command handlers.

use std::io::{BufRead, Write};

use chrono::Utc;
use reqwest::Method;

use super::{LoginArgs, RequestArgs};
use crate::client::{ApiClient, ApiRequest};
use crate::config::ClientConfig;
use crate::error::PipelineError;

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn client() -> Result<ApiClient, Box<dyn std::error::Error>> {
    Ok(ApiClient::new(ClientConfig::from_env()?)?)
}

/// Handle `authpipe login <username>`.
pub async fn handle_login(args: LoginArgs) -> CliResult {
    let password = match args.password {
        Some(password) => password,
        None => read_password()?,
    };
    let client = client()?;
    let identity = client.sign_in(&args.username, &password).await?;
    match identity {
        Some(identity) => println!("Signed in as {}", identity.display_name()),
        None => println!("Signed in as {}", args.username),
    }
    Ok(())
}

/// Handle `authpipe status`.
pub async fn handle_status() -> CliResult {
    let client = client()?;
    let Some(pair) = client.credentials() else {
        println!("Not signed in");
        return Ok(());
    };
    match client.identity() {
        Some(identity) => {
            let role = identity
                .role
                .as_ref()
                .map(|role| format!(" ({role})"))
                .unwrap_or_default();
            println!("Signed in as {}{role}", identity.display_name());
        }
        None => println!("Signed in"),
    }
    match pair.access_expires_at() {
        Some(expires) if expires <= Utc::now() => {
            println!("Access token expired; it is refreshed on the next request")
        }
        Some(expires) => println!("Access token valid until {}", expires.to_rfc3339()),
        None => println!("Access token expiry unknown"),
    }
    Ok(())
}

/// Handle `authpipe logout`.
pub async fn handle_logout() -> CliResult {
    let client = client()?;
    if client.sign_out().await {
        println!("Signed out");
    } else {
        println!("Not signed in");
    }
    Ok(())
}

/// Handle `authpipe request <METHOD> <PATH>`.
pub async fn handle_request(args: RequestArgs) -> CliResult {
    let request = build_request(args)?;
    let response = client()?.send(&request).await?;
    eprintln!("{}", response.status());
    let text = match response.json::<serde_json::Value>() {
        Ok(value) => serde_json::to_string_pretty(&value)?,
        Err(_) => response.text(),
    };
    println!("{text}");
    if !response.is_success() {
        return Err(format!("request failed with status {}", response.status()).into());
    }
    Ok(())
}

fn build_request(args: RequestArgs) -> Result<ApiRequest, PipelineError> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| {
            PipelineError::InvalidArgument(format!("invalid HTTP method: {}", args.method))
        })?;
    let request = ApiRequest::new(method, args.path);
    match args.body {
        Some(body) => {
            let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
                PipelineError::InvalidArgument(format!("--body is not valid JSON: {e}"))
            })?;
            request.json(&value)
        }
        None => Ok(request),
    }
}

fn read_password() -> Result<String, Box<dyn std::error::Error>> {
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err("password must not be empty".into());
    }
    Ok(password)
}

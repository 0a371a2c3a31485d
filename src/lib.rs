//! authpipe: authenticated request pipeline.
//!
//! Attaches bearer credentials to API calls, refreshes an expired access
//! token through a single-flight coordinator, retries the rejected call once
//! and ends the session when the refresh token is no longer accepted.
//!
//! # Quick Start
//!
//! ```no_run
//! use authpipe::prelude::*;
//!
//! # async fn example() -> authpipe::error::Result<()> {
//! let client = ApiClient::new(ClientConfig::from_env()?)?;
//! client.sign_in("ada", "hunter2").await?;
//! let response = client.get("/api/social/feed/").await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod prelude;
pub mod session;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

//! OpenID Connect credential agent
//!
//! A per-user daemon that holds OIDC account configurations, mints
//! short-lived access tokens on demand for local client programs, and
//! performs the OIDC flows (refresh, password, authorization code with a
//! loopback redirect listener, device authorization) against remote
//! identity providers.
//!
//! Clients talk to the agent over a UNIX socket published in
//! `$OIDC_SOCK`, one JSON object per line in each direction; the typed
//! vocabulary lives in [`oidc_agent_core::ipc`] and thin client wrappers
//! in [`api`].
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn doc() -> oidc_agent::Result<()> {
//! // load a stored account into a running agent, then request a token
//! // that is valid for at least a minute
//! oidc_agent::api::add_account("iam", "encryption password").await?;
//! let token = oidc_agent::api::get_access_token("iam", 60, None).await?;
//! println!("{token}");
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod api;
pub mod error;
pub mod flows;
pub mod http;
pub mod store;

pub use crate::{
    agent::Agent,
    error::{Error, Result},
    http::HttpClient,
    store::ConfigStore,
};

// Re-export the protocol crate the way callers expect to reach it.
pub use oidc_agent_core as core;

//! The agent daemon
//!
//! Binds the per-user socket, prints the `eval`-able environment lines,
//! and serves requests until SIGINT or SIGTERM.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use oidc_agent::{
    agent::{self, server},
    core::ipc::{OIDC_PID_ENV_NAME, OIDC_SOCK_ENV_NAME},
    Agent, ConfigStore, HttpClient, Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let store = ConfigStore::discover()?;
    tracing::debug!(dir = %store.dir().display(), "using oidc directory");
    let http = HttpClient::try_default()?;

    let sock_path = agent::default_socket_path();
    let listener = server::bind(&sock_path)?;
    println!(
        "{}={}; export {};",
        OIDC_SOCK_ENV_NAME,
        sock_path.display(),
        OIDC_SOCK_ENV_NAME
    );
    println!(
        "{}={}; export {};",
        OIDC_PID_ENV_NAME,
        std::process::id(),
        OIDC_PID_ENV_NAME
    );

    let agent = Agent::new(store, http, sock_path.clone());
    let result = tokio::select! {
        result = server::run(Arc::clone(&agent), listener) => result,
        _ = shutdown_signal() => {
            tracing::info!("shutting down");
            Ok(())
        }
    };
    let _ = std::fs::remove_file(&sock_path);
    result
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::error!("could not install SIGTERM handler: {e}");
            return std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

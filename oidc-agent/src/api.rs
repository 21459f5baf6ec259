//! Client-side library for talking to a running agent
//!
//! What local programs link against: each wrapper connects to the
//! agent's socket, writes one request line, reads one response line,
//! and unwraps the error envelope. The `_at` variants take an explicit
//! socket path; the plain variants resolve it from `$OIDC_SOCK`.

use std::path::{Path, PathBuf};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
};

use oidc_agent_core::{
    account::AccountRecord,
    ipc::{Flow, Request, Response, OIDC_SOCK_ENV_NAME},
};

use crate::{Error, Result};

/// Resolve the agent socket path from `$OIDC_SOCK`.
pub fn socket_path_from_env() -> Result<PathBuf> {
    std::env::var_os(OIDC_SOCK_ENV_NAME)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or(Error::NoSocket)
}

/// Send one request to the agent at `path` and read back its response.
pub async fn communicate(path: &Path, request: &Request) -> Result<Response> {
    let stream = UnixStream::connect(path).await.map_err(Error::Connection)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut line = serde_json::to_string(request).map_err(Error::SerdeError)?;
    line.push('\n');
    write_half
        .write_all(line.as_bytes())
        .await
        .map_err(Error::Connection)?;

    let mut response = String::new();
    BufReader::new(read_half)
        .read_line(&mut response)
        .await
        .map_err(Error::Connection)?;
    if response.is_empty() {
        return Err(Error::Protocol("agent closed the connection".into()));
    }
    serde_json::from_str(&response).map_err(Error::SerdeError)
}

fn expect_success(response: Response) -> Result<Response> {
    if response.is_failure() {
        return Err(Error::Agent(
            response.error.unwrap_or_else(|| "unknown agent error".into()),
        ));
    }
    Ok(response)
}

/// Request an access token valid for at least `min_valid_period` seconds.
pub async fn get_access_token(
    account: &str,
    min_valid_period: u64,
    scope: Option<&str>,
) -> Result<String> {
    get_access_token_at(&socket_path_from_env()?, account, min_valid_period, scope).await
}

/// Like [`get_access_token`], against an explicit socket path.
pub async fn get_access_token_at(
    path: &Path,
    account: &str,
    min_valid_period: u64,
    scope: Option<&str>,
) -> Result<String> {
    let response = expect_success(
        communicate(
            path,
            &Request::AccessToken {
                account: account.to_owned(),
                min_valid_period,
                scope: scope.map(str::to_owned),
            },
        )
        .await?,
    )?;
    response
        .access_token
        .ok_or_else(|| Error::Protocol("response carried no access token".into()))
}

/// Short names of the accounts currently loaded in the agent.
pub async fn get_loaded_accounts() -> Result<Vec<String>> {
    get_loaded_accounts_at(&socket_path_from_env()?).await
}

/// Like [`get_loaded_accounts`], against an explicit socket path.
pub async fn get_loaded_accounts_at(path: &Path) -> Result<Vec<String>> {
    let response = expect_success(communicate(path, &Request::AccountList).await?)?;
    Ok(response.account_list.unwrap_or_default())
}

/// Decrypt a stored account configuration and load it into the agent.
pub async fn add_account(account: &str, password: &str) -> Result<()> {
    add_account_at(&socket_path_from_env()?, account, password).await
}

/// Like [`add_account`], against an explicit socket path.
pub async fn add_account_at(path: &Path, account: &str, password: &str) -> Result<()> {
    expect_success(
        communicate(
            path,
            &Request::Add {
                account: account.to_owned(),
                password: password.to_owned(),
            },
        )
        .await?,
    )?;
    Ok(())
}

/// Unload an account from the agent.
pub async fn remove_account(account: &str) -> Result<()> {
    remove_account_at(&socket_path_from_env()?, account).await
}

/// Like [`remove_account`], against an explicit socket path.
pub async fn remove_account_at(path: &Path, account: &str) -> Result<()> {
    expect_success(
        communicate(
            path,
            &Request::Remove {
                account: account.to_owned(),
            },
        )
        .await?,
    )?;
    Ok(())
}

/// Run a token flow for an inline account configuration.
///
/// The response is returned as-is: `success` carries the updated config,
/// `accepted` carries either an authorization uri plus state or a device
/// code to poll with.
pub async fn gen_at(
    path: &Path,
    config: AccountRecord,
    flow: Option<Vec<Flow>>,
) -> Result<Response> {
    communicate(path, &Request::Gen { config, flow }).await
}

/// Poll the agent for the outcome of an authorization-code flow.
pub async fn state_lookup_at(path: &Path, state: &str) -> Result<Response> {
    communicate(
        path,
        &Request::StateLookup {
            state: state.to_owned(),
        },
    )
    .await
}

/// Poll the token endpoint once for a device-authorization grant.
pub async fn device_at(
    path: &Path,
    oidc_device: oidc_agent_core::device::DeviceCode,
    config: AccountRecord,
) -> Result<Response> {
    communicate(path, &Request::Device { oidc_device, config }).await
}

/// Register a new client with the issuer via dynamic registration.
pub async fn register_at(
    path: &Path,
    config: AccountRecord,
    authorization: Option<&str>,
    use_password_grant: bool,
) -> Result<Response> {
    communicate(
        path,
        &Request::Register {
            config,
            authorization: authorization.map(str::to_owned),
            use_password_grant,
        },
    )
    .await
}

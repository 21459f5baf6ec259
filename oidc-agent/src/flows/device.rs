//! Device-authorization flow
//!
//! Two phases with no agent-side waiting: `init` obtains the device and
//! user codes, `poll` asks the token endpoint once. The caller paces the
//! polling, honoring `interval` and the `slow_down` error.

use serde::Deserialize;

use oidc_agent_core::{account::AccountRecord, device::DeviceCode};

use crate::{error::IdpError, http::HttpClient, Error, Result};

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

#[derive(Deserialize)]
struct MaybeIdpError {
    error: Option<String>,
    error_description: Option<String>,
}

/// Start a device-authorization grant.
///
/// POSTs `client_id` and `scope` to the device-authorization endpoint.
/// No client authentication: the device endpoint is used precisely when
/// the client cannot keep a secret.
pub async fn init(http: &HttpClient, account: &AccountRecord) -> Result<DeviceCode> {
    let endpoint = account
        .device_authorization_endpoint
        .clone()
        .ok_or(Error::NoDeviceEndpoint)?;
    tracing::debug!(account = %account.short_name, "initializing device flow");
    let params = [
        ("client_id", account.client_id.as_str()),
        ("scope", account.scope.as_str()),
    ];
    let (status, body) = super::post_form(http, &endpoint, &params, None).await?;
    if let Ok(MaybeIdpError {
        error: Some(error),
        error_description,
    }) = serde_json::from_str(&body)
    {
        return Err(Error::Idp(IdpError {
            error,
            description: error_description,
        }));
    }
    if !status.is_success() {
        return Err(Error::RequestFailed(status));
    }
    serde_json::from_str(&body).map_err(Error::SerdeError)
}

/// Poll the token endpoint for the outcome of a device grant.
///
/// `authorization_pending` and `slow_down` surface as [`Error::Idp`] with
/// those exact error strings; on success the granted tokens are stored in
/// the account.
pub async fn poll(
    http: &HttpClient,
    account: &mut AccountRecord,
    device_code: &str,
) -> Result<()> {
    tracing::debug!(account = %account.short_name, "polling device flow");
    let params = [
        ("client_id", account.client_id.as_str()),
        ("client_secret", account.client_secret_str()),
        ("grant_type", DEVICE_GRANT_TYPE),
        ("device_code", device_code),
        ("response_type", "token"),
    ];
    let grant = super::post_token_request(http, account, &params).await?;
    super::store_grant(account, &grant);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use hyper::Body;

    #[tokio::test]
    async fn init_requires_device_endpoint() {
        // the endpoint check happens before any I/O, a dead mock is fine
        let (service, _handle) =
            tower_test::mock::pair::<http::Request<Body>, http::Response<Body>>();
        let account = AccountRecord::default();
        assert!(matches!(
            init(&HttpClient::new(service), &account).await,
            Err(Error::NoDeviceEndpoint)
        ));
    }
}

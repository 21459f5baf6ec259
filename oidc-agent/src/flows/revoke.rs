//! Refresh-token revocation

use secrecy::ExposeSecret;

use oidc_agent_core::account::AccountRecord;

use crate::{error::IdpError, http::HttpClient, Error, Result};

#[derive(serde::Deserialize)]
struct MaybeIdpError {
    error: Option<String>,
    error_description: Option<String>,
}

/// Revoke the account's refresh token at the issuer's revocation
/// endpoint and clear it from the account on success.
pub async fn revoke_refresh(http: &HttpClient, account: &mut AccountRecord) -> Result<()> {
    let endpoint = account
        .endpoints
        .revocation
        .clone()
        .ok_or(Error::NoRevocationEndpoint)?;
    let Some(refresh_token) = account.refresh_token.clone() else {
        // nothing to revoke
        return Ok(());
    };
    tracing::debug!(account = %account.short_name, "performing token revocation");
    let params = [
        ("token_type_hint", "refresh_token"),
        ("token", refresh_token.expose_secret().as_str()),
    ];
    let (status, body) = super::post_form(
        http,
        &endpoint,
        &params,
        Some((&account.client_id, account.client_secret_str())),
    )
    .await?;
    if !body.is_empty() {
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
    }
    if !status.is_success() {
        return Err(Error::RequestFailed(status));
    }
    account.refresh_token = None;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use hyper::Body;

    #[tokio::test]
    async fn revoke_requires_revocation_endpoint() {
        let (service, _handle) =
            tower_test::mock::pair::<http::Request<Body>, http::Response<Body>>();
        let mut account = AccountRecord::default();
        let err = revoke_refresh(&HttpClient::new(service), &mut account)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Token revocation is not supported by this issuer."
        );
    }
}

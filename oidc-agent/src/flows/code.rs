//! Authorization-code flow
//!
//! Phase A mints the authorization uri after a loopback listener has been
//! bound to one of the account's registered redirect ports; phase B
//! exchanges the captured code at the token endpoint. Binding the
//! listener and correlating the callback by `state` is the front door's
//! job (`crate::agent::redirect`); this module only knows the protocol.

use oidc_agent_core::account::AccountRecord;

use crate::{http::HttpClient, Error, Result};

/// Build the authorization uri for phase A of the code flow.
///
/// `redirect_uri` must be the loopback uri the listener actually bound,
/// `state` the correlation key stored in the account (`used_state`).
pub fn authorization_uri(
    account: &AccountRecord,
    redirect_uri: &str,
    state: &str,
) -> Result<String> {
    if account.redirect_uris.is_empty() {
        return Err(Error::NoRedirectUri);
    }
    let authorization_endpoint = account
        .endpoints
        .authorization
        .as_deref()
        .ok_or(Error::NoAuthorizationEndpoint)?;
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("response_type", "code")
        .append_pair("client_id", &account.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", &account.scope)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("state", state)
        .finish();
    Ok(format!("{authorization_endpoint}?{query}"))
}

/// Phase B: exchange `code` at the token endpoint and store the granted
/// tokens in the account. The caller clears `used_state` afterwards,
/// success or not.
pub async fn exchange(
    http: &HttpClient,
    account: &mut AccountRecord,
    code: &str,
    redirect_uri: &str,
) -> Result<()> {
    tracing::debug!(account = %account.short_name, "doing authorization code flow");
    let params = [
        ("client_id", account.client_id.as_str()),
        ("client_secret", account.client_secret_str()),
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("response_type", "token"),
    ];
    let grant = super::post_token_request(http, account, &params).await?;
    super::store_grant(account, &grant);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use oidc_agent_core::account::Endpoints;

    fn account() -> AccountRecord {
        AccountRecord {
            short_name: "iam".into(),
            client_id: "cid".into(),
            redirect_uris: vec!["http://localhost:4242/".into()],
            scope: "openid profile".into(),
            endpoints: Endpoints {
                authorization: Some("https://iss.example/auth".into()),
                ..Endpoints::default()
            },
            ..AccountRecord::default()
        }
    }

    #[test]
    fn authorization_uri_carries_all_parameters() {
        let uri = authorization_uri(&account(), "http://localhost:4242/", "XYZ").unwrap();
        assert!(uri.starts_with("https://iss.example/auth?response_type=code"));
        assert!(uri.contains("client_id=cid"));
        assert!(uri.contains("redirect_uri=http%3A%2F%2Flocalhost%3A4242%2F"));
        assert!(uri.contains("scope=openid+profile"));
        assert!(uri.contains("access_type=offline"));
        assert!(uri.contains("prompt=consent"));
        assert!(uri.contains("state=XYZ"));
    }

    #[test]
    fn authorization_uri_requires_redirect_uris() {
        let mut acc = account();
        acc.redirect_uris.clear();
        assert!(matches!(
            authorization_uri(&acc, "http://localhost:4242/", "XYZ"),
            Err(Error::NoRedirectUri)
        ));
    }

    #[test]
    fn authorization_uri_requires_auth_endpoint() {
        let mut acc = account();
        acc.endpoints.authorization = None;
        assert!(matches!(
            authorization_uri(&acc, "http://localhost:4242/", "XYZ"),
            Err(Error::NoAuthorizationEndpoint)
        ));
    }
}

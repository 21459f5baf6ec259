//! Issuer endpoint discovery
//!
//! GETs `<issuer>/.well-known/openid-configuration` and populates the
//! account's endpoints and capability lists. Every field is optional and
//! read independently; only a missing `token_endpoint` is terminal.

use hyper::Body;
use serde::Deserialize;

use oidc_agent_core::account::AccountRecord;

use crate::{http::HttpClient, Error, Result};

/// Provider metadata fields the agent consumes.
#[derive(Deserialize)]
struct ProviderMetadata {
    token_endpoint: Option<String>,
    authorization_endpoint: Option<String>,
    registration_endpoint: Option<String>,
    revocation_endpoint: Option<String>,
    device_authorization_endpoint: Option<String>,
    scopes_supported: Option<Vec<String>>,
    grant_types_supported: Option<Vec<String>>,
    response_types_supported: Option<Vec<String>>,
}

fn default_grant_types() -> Vec<String> {
    vec!["authorization_code".into(), "implicit".into()]
}

fn default_response_types() -> Vec<String> {
    vec!["code".into()]
}

/// Populate `account.endpoints` and the supported capability lists from
/// the issuer's metadata document.
pub async fn discover(http: &HttpClient, account: &mut AccountRecord) -> Result<()> {
    let configuration_endpoint = account.config_endpoint();
    tracing::debug!(%configuration_endpoint, "discovering issuer endpoints");
    let request = http::Request::builder()
        .uri(&configuration_endpoint)
        .body(Body::empty())
        .map_err(Error::HttpError)?;
    let (status, body) = http.request_text(request).await?;
    if !status.is_success() {
        return Err(Error::RequestFailed(status));
    }
    let metadata: ProviderMetadata = serde_json::from_str(&body).map_err(Error::SerdeError)?;

    let token_endpoint = metadata.token_endpoint.ok_or(Error::MissingTokenEndpoint)?;
    account.endpoints.configuration = Some(configuration_endpoint);
    account.endpoints.token = Some(token_endpoint);
    account.endpoints.authorization = metadata.authorization_endpoint;
    account.endpoints.registration = metadata.registration_endpoint;
    account.endpoints.revocation = metadata.revocation_endpoint;
    if let Some(device) = metadata.device_authorization_endpoint {
        account.device_authorization_endpoint = Some(device);
    }
    if let Some(scopes) = metadata.scopes_supported {
        account.scopes_supported = Some(scopes.join(" "));
    }
    account.grant_types_supported = metadata
        .grant_types_supported
        .unwrap_or_else(default_grant_types);
    account.response_types_supported = metadata
        .response_types_supported
        .unwrap_or_else(default_response_types);
    tracing::debug!(account = %account.short_name, "successfully retrieved issuer endpoints");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::pin_mut;
    use http::Response;
    use tower_test::mock;

    fn mock_issuer(
        metadata: serde_json::Value,
    ) -> (HttpClient, tokio::task::JoinHandle<String>) {
        let (service, handle) = mock::pair::<http::Request<Body>, Response<Body>>();
        let spawned = tokio::spawn(async move {
            pin_mut!(handle);
            let (request, send) = handle.next_request().await.expect("service not called");
            let uri = request.uri().to_string();
            send.send_response(
                Response::builder()
                    .body(Body::from(metadata.to_string()))
                    .unwrap(),
            );
            uri
        });
        (HttpClient::new(service), spawned)
    }

    #[tokio::test]
    async fn discovery_populates_endpoints_and_defaults() {
        let (http, spawned) = mock_issuer(serde_json::json!({
            "token_endpoint": "https://iss.example/token",
            "authorization_endpoint": "https://iss.example/auth",
            "scopes_supported": ["openid", "profile"],
        }));
        let mut account = AccountRecord {
            short_name: "iam".into(),
            issuer_url: "https://iss.example/".into(),
            ..AccountRecord::default()
        };
        discover(&http, &mut account).await.unwrap();
        assert_eq!(
            spawned.await.unwrap(),
            "https://iss.example/.well-known/openid-configuration"
        );
        assert_eq!(
            account.endpoints.token.as_deref(),
            Some("https://iss.example/token")
        );
        assert_eq!(
            account.endpoints.authorization.as_deref(),
            Some("https://iss.example/auth")
        );
        assert_eq!(account.endpoints.registration, None);
        assert_eq!(account.scopes_supported.as_deref(), Some("openid profile"));
        assert_eq!(
            account.grant_types_supported,
            vec!["authorization_code", "implicit"]
        );
        assert_eq!(account.response_types_supported, vec!["code"]);
    }

    #[tokio::test]
    async fn discovery_without_token_endpoint_is_terminal() {
        let (http, _spawned) = mock_issuer(serde_json::json!({
            "authorization_endpoint": "https://iss.example/auth",
        }));
        let mut account = AccountRecord {
            issuer_url: "https://iss.example/".into(),
            ..AccountRecord::default()
        };
        assert!(matches!(
            discover(&http, &mut account).await,
            Err(Error::MissingTokenEndpoint)
        ));
    }
}

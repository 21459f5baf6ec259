//! Dynamic client registration
//!
//! POSTs a JSON registration document to the issuer's registration
//! endpoint, optionally authorized with an initial access token, and
//! returns the issuer's response verbatim for the generation tool to
//! persist as a client config.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use hyper::Body;

use oidc_agent_core::account::{
    self, AccountRecord, HTTP_DEFAULT_PORT, HTTP_FALLBACK_PORT,
};

use crate::{error::IdpError, http::HttpClient, Error, Result};

/// Grant types the agent itself can drive.
const USABLE_GRANT_TYPES: [&str; 2] = ["authorization_code", "refresh_token"];

fn usable_grant_types(account: &AccountRecord, use_password_grant: bool) -> Vec<String> {
    let supported = &account.grant_types_supported;
    let mut grant_types: Vec<String> = USABLE_GRANT_TYPES
        .iter()
        .filter(|g| supported.iter().any(|s| s == *g))
        .map(|g| (*g).to_owned())
        .collect();
    // refresh_token is rarely advertised but required for offline use
    if !grant_types.iter().any(|g| g == "refresh_token") {
        grant_types.push("refresh_token".into());
    }
    if use_password_grant {
        grant_types.push("password".into());
    }
    if grant_types.is_empty() {
        grant_types.push("authorization_code".into());
    }
    grant_types
}

fn usable_response_types(account: &AccountRecord, use_password_grant: bool) -> Vec<String> {
    let supported = &account.response_types_supported;
    let mut response_types: Vec<String> = supported
        .iter()
        .filter(|r| r.as_str() == "code")
        .cloned()
        .collect();
    if use_password_grant && supported.iter().any(|r| r == "token") {
        response_types.push("token".into());
    }
    if response_types.is_empty() {
        response_types.push("code".into());
    }
    response_types
}

/// Register a new client for `account` with the issuer.
///
/// The offered redirect uris are the fixed default port, a random
/// ephemeral port, and the fixed fallback port, matching what the
/// loopback listener will later try to bind.
pub async fn register(
    http: &HttpClient,
    account: &AccountRecord,
    use_password_grant: bool,
    access_token: Option<&str>,
) -> Result<serde_json::Value> {
    let endpoint = account
        .endpoints
        .registration
        .clone()
        .ok_or(Error::NoRegistrationEndpoint)?;
    tracing::debug!(account = %account.short_name, "doing dynamic client registration");
    let document = serde_json::json!({
        "application_type": "web",
        "client_name": format!("oidc-agent:{}", account.short_name),
        "response_types": usable_response_types(account, use_password_grant),
        "grant_types": usable_grant_types(account, use_password_grant),
        "scope": account.scope,
        "redirect_uris": [
            account::port_to_uri(HTTP_DEFAULT_PORT),
            account::port_to_uri(account::random_port()),
            account::port_to_uri(HTTP_FALLBACK_PORT),
        ],
    });
    let mut builder = http::Request::builder()
        .method(Method::POST)
        .uri(&endpoint)
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = access_token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    } else if !account.client_id.is_empty() {
        builder = builder.header(
            AUTHORIZATION,
            format!(
                "Basic {}",
                BASE64.encode(format!(
                    "{}:{}",
                    account.client_id,
                    account.client_secret_str()
                ))
            ),
        );
    }
    let request = builder
        .body(Body::from(document.to_string()))
        .map_err(Error::HttpError)?;
    let (status, body) = http.request_text(request).await?;
    let value: serde_json::Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) if status.is_success() => return Err(Error::SerdeError(e)),
        Err(_) => return Err(Error::RequestFailed(status)),
    };
    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        return Err(Error::Idp(IdpError {
            error: error.to_owned(),
            description: value
                .get("error_description")
                .and_then(|d| d.as_str())
                .map(str::to_owned),
        }));
    }
    Ok(value)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn grant_and_response_types_follow_discovery() {
        let account = AccountRecord {
            grant_types_supported: vec!["authorization_code".into(), "implicit".into()],
            response_types_supported: vec!["code".into(), "token".into()],
            ..AccountRecord::default()
        };
        assert_eq!(
            usable_grant_types(&account, false),
            vec!["authorization_code", "refresh_token"]
        );
        assert_eq!(
            usable_grant_types(&account, true),
            vec!["authorization_code", "refresh_token", "password"]
        );
        assert_eq!(usable_response_types(&account, false), vec!["code"]);
        assert_eq!(usable_response_types(&account, true), vec!["code", "token"]);
    }

    #[test]
    fn empty_discovery_still_yields_a_code_client() {
        let account = AccountRecord::default();
        assert!(usable_grant_types(&account, false).contains(&"refresh_token".to_owned()));
        assert_eq!(usable_response_types(&account, false), vec!["code"]);
    }
}

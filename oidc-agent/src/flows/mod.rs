//! The OIDC flow engine
//!
//! Every flow shares the same preamble: POST
//! `application/x-www-form-urlencoded` to the relevant issuer endpoint
//! with HTTP Basic client authentication *and* `client_id`/`client_secret`
//! in the body, since IdPs disagree on which of the two they accept.
//! Responses are parsed as JSON; an `error` field wins over the HTTP
//! status and is surfaced verbatim.

pub mod code;
pub mod device;
pub mod discovery;
pub mod register;
pub mod revoke;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method, StatusCode,
};
use hyper::Body;
use secrecy::{ExposeSecret, SecretString};

use oidc_agent_core::account::AccountRecord;

use crate::{
    error::IdpError,
    http::HttpClient,
    Error, Result,
};

/// Fields consumed from a token-endpoint response.
#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// A successfully parsed token grant.
#[derive(Debug)]
pub(crate) struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

impl TokenGrant {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs as i64))
    }
}

pub(crate) async fn post_form(
    http: &HttpClient,
    endpoint: &str,
    params: &[(&str, &str)],
    basic_auth: Option<(&str, &str)>,
) -> Result<(StatusCode, String)> {
    let body = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    tracing::debug!(%endpoint, "posting form");
    let mut builder = http::Request::builder()
        .method(Method::POST)
        .uri(endpoint)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some((client_id, client_secret)) = basic_auth {
        builder = builder.header(
            AUTHORIZATION,
            format!(
                "Basic {}",
                BASE64.encode(format!("{client_id}:{client_secret}"))
            ),
        );
    }
    let request = builder.body(Body::from(body)).map_err(Error::HttpError)?;
    http.request_text(request).await
}

fn parse_token_response(status: StatusCode, body: &str) -> Result<TokenGrant> {
    let response: TokenResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) if status.is_success() => return Err(Error::SerdeError(e)),
        Err(_) => return Err(Error::RequestFailed(status)),
    };
    if let Some(error) = response.error {
        return Err(Error::Idp(IdpError {
            error,
            description: response.error_description,
        }));
    }
    let access_token = response.access_token.ok_or(Error::InvalidTokenResponse)?;
    Ok(TokenGrant {
        access_token,
        refresh_token: response.refresh_token,
        expires_in: response.expires_in,
    })
}

pub(crate) async fn post_token_request(
    http: &HttpClient,
    account: &AccountRecord,
    params: &[(&str, &str)],
) -> Result<TokenGrant> {
    let endpoint = account
        .endpoints
        .token
        .clone()
        .ok_or(Error::MissingTokenEndpoint)?;
    let (status, body) = post_form(
        http,
        &endpoint,
        params,
        Some((&account.client_id, account.client_secret_str())),
    )
    .await?;
    parse_token_response(status, &body)
}

/// Store a fresh grant in the account: cache the access token (expiry
/// never moves backwards) and adopt a returned refresh token.
fn store_grant(account: &mut AccountRecord, grant: &TokenGrant) {
    account.touch_access_token(
        SecretString::new(grant.access_token.clone()),
        grant.expires_at(),
    );
    if let Some(refresh_token) = &grant.refresh_token {
        account.refresh_token = Some(SecretString::new(refresh_token.clone()));
    }
}

/// Issue an access token via the refresh flow.
///
/// Without `scope` the returned token also replaces the account's cached
/// one; a scoped-down token is handed to the caller only and never
/// displaces the general-purpose cache. A rotated refresh token replaces
/// the stored one in memory and is warned about — the on-disk file is not
/// rewritten.
pub async fn refresh(
    http: &HttpClient,
    account: &mut AccountRecord,
    scope: Option<&str>,
) -> Result<String> {
    let refresh_token = account
        .refresh_token
        .clone()
        .ok_or(Error::MissingRefreshToken)?;
    tracing::debug!(account = %account.short_name, "doing refresh flow");
    let mut params = vec![
        ("client_id", account.client_id.as_str()),
        ("client_secret", account.client_secret_str()),
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token.expose_secret().as_str()),
    ];
    if let Some(scope) = scope {
        params.push(("scope", scope));
    }
    let grant = post_token_request(http, account, &params).await?;

    if let Some(new_token) = &grant.refresh_token {
        if new_token != refresh_token.expose_secret() {
            tracing::warn!(
                account = %account.short_name,
                "issuer rotated the refresh token; keeping the new one in memory only, \
                 the stored configuration still holds the old one"
            );
            account.refresh_token = Some(SecretString::new(new_token.clone()));
        }
    }
    match scope {
        None => {
            account.touch_access_token(
                SecretString::new(grant.access_token.clone()),
                grant.expires_at(),
            );
        }
        Some(_) => {
            // Scoped tokens are not cached, but the expiry bookkeeping
            // still moves forward, never backwards.
            if let Some(expires_at) = grant.expires_at() {
                if account.expires_at.map_or(true, |old| expires_at >= old) {
                    account.expires_at = Some(expires_at);
                }
            }
        }
    }
    Ok(grant.access_token)
}

/// Issue an access token via the resource-owner password flow and cache
/// it (plus any granted refresh token) in the account.
pub async fn password(http: &HttpClient, account: &mut AccountRecord) -> Result<()> {
    let (username, password) = match (&account.username, &account.password) {
        (Some(u), Some(p)) => (u.clone(), p.clone()),
        _ => return Err(Error::MissingCredentials),
    };
    tracing::debug!(account = %account.short_name, "doing password flow");
    let params = [
        ("client_id", account.client_id.as_str()),
        ("client_secret", account.client_secret_str()),
        ("grant_type", "password"),
        ("username", username.as_str()),
        ("password", password.expose_secret().as_str()),
    ];
    let grant = post_token_request(http, account, &params).await?;
    store_grant(account, &grant);
    Ok(())
}

/// The user-visible token contract: return the cached token when it is
/// still valid long enough, otherwise refresh, otherwise fall back to the
/// password flow when credentials are present.
pub async fn get_access_token(
    http: &HttpClient,
    account: &mut AccountRecord,
    min_valid_period: u64,
    scope: Option<&str>,
) -> Result<String> {
    if scope.is_none() && account.token_valid_for(min_valid_period) {
        if let Some(token) = &account.access_token {
            return Ok(token.expose_secret().clone());
        }
    }
    if account.endpoints.token.is_none() {
        discovery::discover(http, account).await?;
    }
    let refresh_err = if account.has_refresh_token() {
        match refresh(http, account, scope).await {
            Ok(token) => return Ok(token),
            Err(e) => {
                tracing::debug!(account = %account.short_name, "refresh flow failed: {e}");
                Some(e)
            }
        }
    } else {
        None
    };
    if scope.is_none() && account.has_credentials() {
        password(http, account).await?;
        if let Some(token) = &account.access_token {
            return Ok(token.expose_secret().clone());
        }
    }
    Err(refresh_err.unwrap_or(Error::MissingCredentials))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_response_error_field_wins() {
        let err = parse_token_response(StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#)
            .unwrap_err();
        match err {
            Error::Idp(e) => assert_eq!(e.error, "invalid_grant"),
            other => panic!("expected Idp error, got {other:?}"),
        }
    }

    #[test]
    fn token_response_needs_access_token() {
        assert!(matches!(
            parse_token_response(StatusCode::OK, r#"{"expires_in":60}"#),
            Err(Error::InvalidTokenResponse)
        ));
        assert!(matches!(
            parse_token_response(StatusCode::BAD_GATEWAY, "<html>down</html>"),
            Err(Error::RequestFailed(StatusCode::BAD_GATEWAY))
        ));
    }

    #[test]
    fn token_response_happy_path() {
        let grant = parse_token_response(
            StatusCode::OK,
            r#"{"access_token":"at","refresh_token":"rt","expires_in":3600}"#,
        )
        .unwrap();
        assert_eq!(grant.access_token, "at");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt"));
        assert_eq!(grant.expires_in, Some(3600));
    }
}

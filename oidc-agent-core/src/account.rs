//! The account record and its invariant-preserving helpers
//!
//! An account is the local handle to an (issuer, client credentials,
//! refresh token) triple. The serialized form covers exactly the fields
//! the generation tool persists; everything discovered or minted at
//! runtime (issuer endpoints, the cached access token, the outstanding
//! authorization-code `state`) is rebuilt after load and never written to
//! disk.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Issuer whose token endpoint rejects `offline_access` in the scope list.
pub const GOOGLE_ISSUER: &str = "https://accounts.google.com/";

/// Path under the issuer url serving the provider metadata document.
pub const CONF_ENDPOINT_SUFFIX: &str = ".well-known/openid-configuration";

/// First redirect port offered during dynamic client registration.
pub const HTTP_DEFAULT_PORT: u16 = 2912;
/// Last-resort redirect port offered during dynamic client registration.
pub const HTTP_FALLBACK_PORT: u16 = 8080;

/// Endpoints discovered from the issuer's provider metadata.
///
/// Only `token` is mandatory for a usable account; everything else gates
/// an optional flow. Each field is populated independently, absent fields
/// stay `None`.
#[derive(Clone, Debug, Default)]
pub struct Endpoints {
    /// The metadata document the other endpoints came from.
    pub configuration: Option<String>,
    /// Token endpoint. Mandatory once discovery has succeeded.
    pub token: Option<String>,
    /// Authorization endpoint, required for the code flow.
    pub authorization: Option<String>,
    /// Dynamic client registration endpoint.
    pub registration: Option<String>,
    /// Token revocation endpoint.
    pub revocation: Option<String>,
}

/// A loaded account configuration.
///
/// Secret-bearing fields use [`SecretString`] so they are zeroed when the
/// record is dropped and redacted in debug output.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccountRecord {
    /// The local short name, unique within the registry.
    #[serde(rename = "name", default)]
    pub short_name: String,
    /// Absolute https issuer url, trailing slash normalized on load.
    #[serde(alias = "issuer", default)]
    pub issuer_url: String,
    /// OAuth2 client id, mandatory after registration.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    /// OAuth2 client secret.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub client_secret: Option<SecretString>,
    /// Username for the resource-owner password flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password for the resource-owner password flow.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub password: Option<SecretString>,
    /// Refresh token obtained by a flow that granted offline access.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub refresh_token: Option<SecretString>,
    /// CA bundle overriding the system trust store for this issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<std::path::PathBuf>,
    /// Registered `http://localhost:<port>/` redirect uris, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_uris: Vec<String>,
    /// Space-delimited requested scopes. The special value `max` requests
    /// everything the issuer supports.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
    /// Device-authorization endpoint. Persisted because some issuers only
    /// hand it out during registration, not in their metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_authorization_endpoint: Option<String>,

    /// Discovered issuer endpoints.
    #[serde(skip)]
    pub endpoints: Endpoints,
    /// Space-delimited scopes the issuer advertises.
    #[serde(skip)]
    pub scopes_supported: Option<String>,
    /// Grant types the issuer advertises.
    #[serde(skip)]
    pub grant_types_supported: Vec<String>,
    /// Response types the issuer advertises.
    #[serde(skip)]
    pub response_types_supported: Vec<String>,
    /// Cached access token. Never persisted.
    #[serde(skip)]
    pub access_token: Option<SecretString>,
    /// Expiry of the cached access token.
    #[serde(skip)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Correlation key of an in-flight authorization-code flow.
    #[serde(skip)]
    pub used_state: Option<String>,
}

fn serialize_secret<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_secret<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(SecretString::new))
}

#[cfg(test)]
impl PartialEq for AccountRecord {
    fn eq(&self, other: &Self) -> bool {
        serde_json::to_value(self).unwrap() == serde_json::to_value(other).unwrap()
    }
}

impl AccountRecord {
    /// Normalize a record fresh off the wire or off disk: trailing slash
    /// on the issuer url, empty optional strings dropped to `None`.
    pub fn normalized(mut self) -> Self {
        if !self.issuer_url.is_empty() && !self.issuer_url.ends_with('/') {
            self.issuer_url.push('/');
        }
        self.username = self.username.filter(|u| !u.is_empty());
        self.cert_path = self.cert_path.filter(|p| !p.as_os_str().is_empty());
        self.device_authorization_endpoint =
            self.device_authorization_endpoint.filter(|e| !e.is_empty());
        self
    }

    /// Provider metadata url for this issuer.
    pub fn config_endpoint(&self) -> String {
        format!("{}{}", self.issuer_url, CONF_ENDPOINT_SUFFIX)
    }

    fn is_google(&self) -> bool {
        self.issuer_url == GOOGLE_ISSUER
    }

    /// The client secret as a borrowed str, empty when unset. Issuers that
    /// registered a public client get the empty string in both auth spots.
    pub fn client_secret_str(&self) -> &str {
        self.client_secret
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .unwrap_or("")
    }

    /// Whether a refresh token is present.
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Whether both username and password are present.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Drop username and password. The code flow never uses them and the
    /// minted authorization uri must not be able to leak them either.
    pub fn clear_credentials(&mut self) {
        self.username = None;
        self.password = None;
    }

    /// Whether the cached access token is still valid for at least
    /// `min_valid_period` seconds.
    pub fn token_valid_for(&self, min_valid_period: u64) -> bool {
        match (&self.access_token, self.expires_at) {
            (Some(_), Some(expires_at)) => {
                let left = expires_at - Utc::now();
                left > Duration::zero() && left > Duration::seconds(min_valid_period as i64)
            }
            _ => false,
        }
    }

    /// Replace the cached access token, keeping expiry monotonic: an
    /// overwrite that would move `expires_at` backwards is rejected and
    /// the cache left untouched.
    pub fn touch_access_token(
        &mut self,
        token: SecretString,
        expires_at: Option<DateTime<Utc>>,
    ) -> bool {
        if let (Some(new), Some(old)) = (expires_at, self.expires_at) {
            if new < old {
                return false;
            }
        }
        self.access_token = Some(token);
        if let Some(expires_at) = expires_at {
            self.expires_at = Some(expires_at);
        }
        true
    }

    /// Ports of the registered redirect uris, in registration order.
    /// Uris that fail to parse or carry no explicit port are skipped.
    pub fn redirect_ports(&self) -> Vec<u16> {
        self.redirect_uris
            .iter()
            .filter_map(|uri| port_from_uri(uri))
            .collect()
    }

    /// Reconcile the requested scope against what the issuer supports.
    ///
    /// The advertised set is augmented with `openid` (always) and
    /// `offline_access` (except for Google, which rejects it); the result
    /// is the requested scopes that survive in the augmented set, in
    /// request order. `scope == "max"` selects the whole augmented set,
    /// and an issuer that advertises nothing leaves the request as-is.
    pub fn usable_scope(&self) -> String {
        let supported = match &self.scopes_supported {
            Some(s) if !s.is_empty() => s,
            _ => return self.scope.clone(),
        };
        if self.scope.is_empty() {
            return String::new();
        }
        let mut supported: Vec<&str> = supported.split_whitespace().collect();
        if !supported.contains(&"openid") {
            supported.push("openid");
        }
        if !supported.contains(&"offline_access") && !self.is_google() {
            supported.push("offline_access");
        }
        if self.scope == "max" {
            return supported.join(" ");
        }
        self.scope
            .split_whitespace()
            .filter(|wanted| supported.contains(wanted))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Render a loopback redirect uri for `port`.
pub fn port_to_uri(port: u16) -> String {
    format!("http://localhost:{port}/")
}

/// Extract the explicit port of a redirect uri.
pub fn port_from_uri(uri: &str) -> Option<u16> {
    uri.parse::<http::Uri>().ok()?.port_u16()
}

/// Pick a random ephemeral-range port for dynamic client registration.
pub fn random_port() -> u16 {
    use rand::Rng;
    rand::thread_rng().gen_range(49152..=65535)
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(scope: &str, supported: Option<&str>, issuer: &str) -> AccountRecord {
        AccountRecord {
            issuer_url: issuer.into(),
            scope: scope.into(),
            scopes_supported: supported.map(str::to_owned),
            ..AccountRecord::default()
        }
    }

    #[test]
    fn json_roundtrip_keeps_significant_fields() {
        let json = serde_json::json!({
            "name": "iam",
            "issuer_url": "https://issuer.example.com/",
            "client_id": "cid",
            "client_secret": "css",
            "username": "u",
            "password": "p",
            "refresh_token": "rt",
            "cert_path": "/etc/ssl/certs/ca-certificates.crt",
            "redirect_uris": ["http://localhost:4242/", "http://localhost:8080/"],
            "scope": "openid profile",
            "device_authorization_endpoint": "https://issuer.example.com/devicecode",
        });
        let account: AccountRecord = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(serde_json::to_value(&account).unwrap(), json);
    }

    #[test]
    fn legacy_issuer_key_accepted() {
        let account: AccountRecord =
            serde_json::from_str(r#"{"name":"a","issuer":"https://iss.example/"}"#).unwrap();
        assert_eq!(account.issuer_url, "https://iss.example/");
    }

    #[test]
    fn normalization_appends_slash_and_drops_empties() {
        let account: AccountRecord = serde_json::from_value(serde_json::json!({
            "name": "a",
            "issuer_url": "https://iss.example",
            "username": "",
            "password": "",
        }))
        .unwrap();
        let account = account.normalized();
        assert_eq!(account.issuer_url, "https://iss.example/");
        assert_eq!(account.username, None);
        assert!(account.password.is_none());
        assert_eq!(
            account.config_endpoint(),
            "https://iss.example/.well-known/openid-configuration"
        );
    }

    #[test]
    fn usable_scope_is_subset_of_augmented_supported() {
        let account = record(
            "openid profile offline_access gibberish",
            Some("openid profile email"),
            "https://iss.example/",
        );
        assert_eq!(account.usable_scope(), "openid profile offline_access");
    }

    #[test]
    fn usable_scope_max_takes_augmented_set() {
        let account = record("max", Some("openid email"), "https://iss.example/");
        assert_eq!(account.usable_scope(), "openid email offline_access");
    }

    #[test]
    fn usable_scope_google_never_gains_offline_access() {
        let account = record("openid offline_access", Some("openid email"), GOOGLE_ISSUER);
        assert_eq!(account.usable_scope(), "openid");
    }

    #[test]
    fn usable_scope_without_discovery_passes_through() {
        let account = record("openid weird", None, "https://iss.example/");
        assert_eq!(account.usable_scope(), "openid weird");
    }

    #[test]
    fn access_token_expiry_is_monotonic() {
        let mut account = AccountRecord::default();
        let later = Utc::now() + Duration::seconds(600);
        let earlier = Utc::now() + Duration::seconds(60);
        assert!(account.touch_access_token(SecretString::new("t1".into()), Some(later)));
        assert!(!account.touch_access_token(SecretString::new("t2".into()), Some(earlier)));
        assert_eq!(
            account.access_token.as_ref().unwrap().expose_secret(),
            "t1"
        );
        assert!(account.token_valid_for(60));
        assert!(!account.token_valid_for(700));
    }

    #[test]
    fn redirect_ports_parse() {
        let account = AccountRecord {
            redirect_uris: vec![
                "http://localhost:4242/".into(),
                "not a uri".into(),
                "http://localhost:8080/".into(),
            ],
            ..AccountRecord::default()
        };
        assert_eq!(account.redirect_ports(), vec![4242, 8080]);
        assert_eq!(port_to_uri(4242), "http://localhost:4242/");
        assert_eq!(port_from_uri("http://localhost:2912/"), Some(2912));
    }
}

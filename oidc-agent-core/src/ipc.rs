//! The IPC request/response vocabulary
//!
//! Every request is one JSON object selected by its `"request"` field;
//! every response is one JSON object whose `"status"` field is `success`,
//! `accepted`, `failure`, or `NotFound`. Both travel as a single line
//! over the agent's UNIX socket.

use serde::{Deserialize, Serialize};

use crate::{account::AccountRecord, device::DeviceCode};

/// Environment variable the agent publishes its socket path in.
pub const OIDC_SOCK_ENV_NAME: &str = "OIDC_SOCK";
/// Environment variable the agent publishes its pid in.
pub const OIDC_PID_ENV_NAME: &str = "OIDCD_PID";

/// Status of a fully handled request.
pub const STATUS_SUCCESS: &str = "success";
/// Status of a failed request; `error` carries the message.
pub const STATUS_FAILURE: &str = "failure";
/// Status of a long-running flow that returned a handle instead of a result.
pub const STATUS_ACCEPTED: &str = "accepted";
/// Status when the requested thing does not exist.
pub const STATUS_NOTFOUND: &str = "NotFound";

/// Error message for token requests against an unloaded account.
pub const ACCOUNT_NOT_LOADED: &str = "account not loaded";
/// Device-flow transient error: poll slower.
pub const OIDC_SLOW_DOWN: &str = "slow_down";
/// Device-flow transient error: the user has not authorized yet.
pub const OIDC_AUTHORIZATION_PENDING: &str = "authorization_pending";

/// One of the supported token flows, as named on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    /// Refresh-token grant.
    Refresh,
    /// Resource-owner password grant.
    Password,
    /// Authorization-code grant with loopback redirect capture.
    Code,
    /// Device-authorization grant.
    Device,
}

/// A request to the agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum Request {
    /// Mint or return a cached access token for a loaded account.
    AccessToken {
        /// Short name of the account.
        account: String,
        /// Seconds the returned token must remain valid for.
        min_valid_period: u64,
        /// Optional scope restriction; scoped tokens are not cached.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },
    /// List the short names of all loaded accounts.
    AccountList,
    /// Decrypt an account file and load it into the registry.
    Add {
        /// Short name of the on-disk account configuration.
        account: String,
        /// Decryption password; consumed and discarded by the agent.
        password: String,
    },
    /// Unload an account from the registry.
    Remove {
        /// Short name of the loaded account.
        account: String,
    },
    /// Revoke the refresh token and delete the on-disk configuration.
    Delete {
        /// Short name of the loaded account.
        account: String,
    },
    /// Run a token flow for a not-yet-stored account configuration.
    Gen {
        /// The inline account configuration.
        config: AccountRecord,
        /// Flow order override; the default is refresh, password, code,
        /// device, skipping flows the record cannot support.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flow: Option<Vec<Flow>>,
    },
    /// Register a client with the issuer via dynamic registration.
    Register {
        /// The inline account configuration.
        config: AccountRecord,
        /// Initial access token for protected registration endpoints.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        authorization: Option<String>,
        /// Also request the password grant for the new client.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        use_password_grant: bool,
    },
    /// Exchange an authorization code captured by a redirect listener.
    CodeExchange {
        /// The account configuration the listener was started with.
        config: AccountRecord,
        /// The redirect uri the listener is bound to.
        redirect_uri: String,
        /// The authorization code.
        code: String,
        /// The correlation state.
        state: String,
    },
    /// Poll for the outcome of an authorization-code flow.
    StateLookup {
        /// The correlation state handed out by `gen`.
        state: String,
    },
    /// Poll the token endpoint for a device-authorization grant.
    Device {
        /// The device code handed out by `gen`.
        oidc_device: DeviceCode,
        /// The inline account configuration.
        config: AccountRecord,
    },
}

/// A response from the agent. Which optional fields are present depends
/// on the request and on `status`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Response {
    /// One of the `STATUS_*` strings.
    pub status: String,
    /// Error message when `status` is `failure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optional remediation hint accompanying an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    /// The minted access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Short names of the loaded accounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_list: Option<Vec<String>>,
    /// An account configuration, updated by the flow that ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AccountRecord>,
    /// The issuer's registration response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<serde_json::Value>,
    /// Device-authorization handle to poll with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_device: Option<DeviceCode>,
    /// Authorization uri to open in a browser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Correlation state for `state_lookup`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Response {
    /// A bare `success` response.
    pub fn success() -> Self {
        Self {
            status: STATUS_SUCCESS.into(),
            ..Self::default()
        }
    }

    /// A bare `accepted` response.
    pub fn accepted() -> Self {
        Self {
            status: STATUS_ACCEPTED.into(),
            ..Self::default()
        }
    }

    /// A bare `NotFound` response.
    pub fn not_found() -> Self {
        Self {
            status: STATUS_NOTFOUND.into(),
            ..Self::default()
        }
    }

    /// A `failure` response carrying `error`.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: STATUS_FAILURE.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Attach a remediation hint.
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    /// Attach an access token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Attach an account configuration.
    pub fn with_config(mut self, config: AccountRecord) -> Self {
        self.config = Some(config);
        self
    }

    /// Attach the loaded-account list.
    pub fn with_account_list(mut self, account_list: Vec<String>) -> Self {
        self.account_list = Some(account_list);
        self
    }

    /// Attach an authorization uri and its correlation state.
    pub fn with_code_uri(mut self, uri: impl Into<String>, state: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self.state = Some(state.into());
        self
    }

    /// Attach a device-authorization handle.
    pub fn with_device(mut self, device: DeviceCode) -> Self {
        self.oidc_device = Some(device);
        self
    }

    /// Attach a registration response.
    pub fn with_client(mut self, client: serde_json::Value) -> Self {
        self.client = Some(client);
        self
    }

    /// Whether `status` is `success`.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Whether `status` is `failure`.
    pub fn is_failure(&self) -> bool {
        self.status == STATUS_FAILURE
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn requests_are_tagged_by_request_field() {
        let req = Request::AccessToken {
            account: "iam".into(),
            min_valid_period: 60,
            scope: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["request"], "access_token");
        assert_eq!(json["account"], "iam");
        assert_eq!(json["min_valid_period"], 60);
        assert!(json.get("scope").is_none());

        let parsed: Request =
            serde_json::from_str(r#"{"request":"account_list"}"#).unwrap();
        assert!(matches!(parsed, Request::AccountList));
    }

    #[test]
    fn failure_response_shape() {
        let resp = Response::failure("boom").with_info("check your issuer");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["info"], "check your issuer");
        assert!(json.get("access_token").is_none());
    }
}

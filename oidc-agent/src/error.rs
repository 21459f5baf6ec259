//! Error handling in [`oidc-agent`][crate]

use std::path::PathBuf;
use thiserror::Error;

pub use oidc_agent_core::crypt::CryptError;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors when working with [`oidc-agent`][crate]
#[derive(Error, Debug)]
pub enum Error {
    /// The IdP answered with an OAuth2 error object.
    ///
    /// Its `error_description` (falling back to `error`) is propagated
    /// verbatim; device-flow `authorization_pending` / `slow_down` travel
    /// through here as well.
    #[error("{0}")]
    Idp(#[source] IdpError),

    /// Opening an encrypted account file failed.
    #[error(transparent)]
    Crypt(#[from] CryptError),

    /// A token was requested for an account that is not in the registry.
    #[error("account not loaded")]
    NotLoaded,

    /// The password flow was attempted without username and password.
    #[error("no username and password set for this account")]
    MissingCredentials,

    /// The refresh flow was attempted without a refresh token.
    #[error("no refresh token available for this account")]
    MissingRefreshToken,

    /// The code flow was attempted without registered redirect uris.
    #[error("no redirect uris are registered for this account")]
    NoRedirectUri,

    /// The issuer advertises no device-authorization endpoint.
    #[error("Device flow is not supported by this issuer.")]
    NoDeviceEndpoint,

    /// The issuer advertises no registration endpoint.
    #[error("Dynamic registration is not supported by this issuer.")]
    NoRegistrationEndpoint,

    /// The issuer advertises no revocation endpoint.
    #[error("Token revocation is not supported by this issuer.")]
    NoRevocationEndpoint,

    /// The issuer advertises no authorization endpoint.
    #[error("the issuer does not advertise an authorization endpoint")]
    NoAuthorizationEndpoint,

    /// Provider metadata without a token endpoint is unusable.
    #[error("could not get the token endpoint from the configuration endpoint")]
    MissingTokenEndpoint,

    /// No registered redirect port could be bound.
    #[error("could not start the redirect listener on any registered port")]
    HttpServerStart,

    /// Malformed inbound IPC data.
    #[error("Bad Request: {0}")]
    Protocol(String),

    /// The agent answered a client request with `status: failure`.
    #[error("{0}")]
    Agent(String),

    /// `OIDC_SOCK` is not set in the environment.
    #[error("$OIDC_SOCK is not set; is oidc-agentd running?")]
    NoSocket,

    /// Errors from the on-disk config store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// ConnectionError for when a socket fails to connect.
    #[error("ConnectionError: {0}")]
    Connection(std::io::Error),

    /// Hyper error
    #[error("HyperError: {0}")]
    HyperError(#[from] hyper::Error),

    /// Service error
    #[error("ServiceError: {0}")]
    Service(tower::BoxError),

    /// Http based error
    #[error("HttpError: {0}")]
    HttpError(#[from] http::Error),

    /// Failed to construct a URI.
    #[error(transparent)]
    InvalidUri(#[from] http::uri::InvalidUri),

    /// UTF-8 Error
    #[error("UTF-8 Error: {0}")]
    FromUtf8(#[from] std::string::FromUtf8Error),

    /// Common error case when parsing JSON bodies into own structs
    #[error("Error deserializing response: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// The remote endpoint answered with a non-success status and no
    /// parseable OAuth2 error body.
    #[error("request failed with status code: {0}")]
    RequestFailed(http::StatusCode),

    /// A token response without an `access_token` field.
    #[error("invalid token response received from the provider")]
    InvalidTokenResponse,
}

/// An OAuth2 error object as returned by an IdP.
#[derive(Debug)]
pub struct IdpError {
    /// The machine-readable `error` code.
    pub error: String,
    /// The human-readable `error_description`, when present.
    pub description: Option<String>,
}

impl std::fmt::Display for IdpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description.as_deref().unwrap_or(&self.error))
    }
}

impl std::error::Error for IdpError {}

impl IdpError {
    /// Whether this is the device flow's `authorization_pending` state.
    pub fn is_pending(&self) -> bool {
        self.error == oidc_agent_core::ipc::OIDC_AUTHORIZATION_PENDING
    }

    /// Whether this is the device flow's `slow_down` state.
    pub fn is_slow_down(&self) -> bool {
        self.error == oidc_agent_core::ipc::OIDC_SLOW_DOWN
    }
}

/// Possible errors when accessing the on-disk OIDC directory.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Neither candidate OIDC directory exists under `$HOME`.
    #[error("no oidc directory found; create ~/.config/oidc-agent or ~/.oidc-agent")]
    NoOidcDir,

    /// `$HOME` could not be resolved.
    #[error("could not determine the home directory")]
    NoHome,

    /// No account configuration with that short name.
    #[error("no account configuration found for '{0}'")]
    NotFound(String),

    /// Reading a file under the OIDC dir failed.
    #[error("failed to read '{path}': {source}")]
    ReadFile {
        /// File that failed to read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Writing a file under the OIDC dir failed.
    #[error("failed to write '{path}': {source}")]
    WriteFile {
        /// File that failed to write.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Enumerating the OIDC dir failed.
    #[error("failed to list '{path}': {source}")]
    ListDir {
        /// Directory that failed to list.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The decrypted account file is not a valid account record.
    #[error("account configuration for '{0}' is malformed")]
    Malformed(String, #[source] serde_json::Error),
}

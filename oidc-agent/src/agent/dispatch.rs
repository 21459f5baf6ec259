//! The request dispatcher
//!
//! Matches on the typed request sum type and drives the registry, the
//! config store, and the flow engine. The whole dispatcher state sits
//! behind one lock held for the duration of a request, so every handler
//! below sees the registry invariants hold without further care.

use std::sync::Arc;

use rand::{distributions::Alphanumeric, Rng};

use oidc_agent_core::{
    account::{self, AccountRecord},
    device::DeviceCode,
    ipc::{Flow, Request, Response, ACCOUNT_NOT_LOADED},
};

use crate::{flows, http::HttpClient, Error};

use super::{Agent, AgentState, CODE_FLOW_TIMEOUT};

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

/// The per-account HTTPS client: the default stack, or one trusting only
/// the account's CA bundle when `cert_path` is set.
fn client_for(default: &HttpClient, account: &AccountRecord) -> Result<HttpClient, Error> {
    match &account.cert_path {
        Some(path) => HttpClient::with_ca_bundle(path),
        None => Ok(default.clone()),
    }
}

fn error_response(e: &Error) -> Response {
    match e {
        Error::MissingTokenEndpoint => Response::failure(e.to_string()).with_info(
            "This could be a network issue, but it is more likely \
             that your issuer url is not correct.",
        ),
        Error::NoRegistrationEndpoint => Response::failure(e.to_string())
            .with_info("Please register a client manually and provide its id and secret."),
        _ => Response::failure(e.to_string()),
    }
}

impl Agent {
    /// Handle one request and produce its response. Takes the dispatcher
    /// lock for the whole request; concurrent requests queue.
    pub async fn handle(self: Arc<Self>, request: Request) -> Response {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        match request {
            Request::AccessToken {
                account,
                min_valid_period,
                scope,
            } => access_token(state, &account, min_valid_period, scope.as_deref()).await,
            Request::AccountList => account_list(state),
            Request::Add { account, password } => add(state, &account, &password).await,
            Request::Remove { account } => remove(state, &account),
            Request::Delete { account } => delete(state, &account).await,
            Request::Gen { config, flow } => gen(&self, state, config, flow).await,
            Request::Register {
                config,
                authorization,
                use_password_grant,
            } => register(state, config, authorization.as_deref(), use_password_grant).await,
            Request::CodeExchange {
                config: _,
                redirect_uri,
                code,
                state: oauth_state,
            } => code_exchange(state, &redirect_uri, &code, &oauth_state).await,
            Request::StateLookup { state: oauth_state } => state_lookup(state, &oauth_state),
            Request::Device {
                oidc_device,
                config,
            } => device(state, &oidc_device, config).await,
        }
    }
}

async fn access_token(
    state: &mut AgentState,
    name: &str,
    min_valid_period: u64,
    scope: Option<&str>,
) -> Response {
    let AgentState { registry, http, .. } = state;
    let Some(account) = registry.get_mut(name) else {
        return Response::failure(ACCOUNT_NOT_LOADED);
    };
    let http = match client_for(http, account) {
        Ok(http) => http,
        Err(e) => return error_response(&e),
    };
    match flows::get_access_token(&http, account, min_valid_period, scope).await {
        Ok(token) => Response::success().with_access_token(token),
        Err(e) => error_response(&e),
    }
}

fn account_list(state: &AgentState) -> Response {
    if state.registry.is_empty() {
        let mut response = Response::not_found().with_account_list(Vec::new());
        response.error = Some("no accounts loaded".into());
        return response;
    }
    Response::success().with_account_list(state.registry.short_names())
}

async fn add(state: &mut AgentState, name: &str, password: &str) -> Response {
    if state.registry.get(name).is_some() {
        return Response::failure("account already loaded");
    }
    let mut account = match state.store.read_account(name, password) {
        Ok(account) => account,
        Err(e) => return error_response(&e),
    };
    let http = match client_for(&state.http, &account) {
        Ok(http) => http,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = flows::discovery::discover(&http, &mut account).await {
        return error_response(&e);
    }
    match state.registry.add(account) {
        Ok(()) => {
            tracing::debug!(account = %name, "loaded account");
            Response::success()
        }
        Err(e) => Response::failure(e.to_string()),
    }
}

fn remove(state: &mut AgentState, name: &str) -> Response {
    match state.registry.remove(name) {
        Ok(account) => {
            if let Some(oauth_state) = &account.used_state {
                state.listeners.terminate(oauth_state);
                state.pending.remove(oauth_state);
            }
            tracing::debug!(account = %name, "unloaded account");
            Response::success()
        }
        Err(e) => Response::failure(e.to_string()),
    }
}

async fn delete(state: &mut AgentState, name: &str) -> Response {
    let AgentState {
        registry,
        store,
        http,
        ..
    } = state;
    let Some(account) = registry.get_mut(name) else {
        return Response::failure(ACCOUNT_NOT_LOADED);
    };
    let http = match client_for(http, account) {
        Ok(http) => http,
        Err(e) => return error_response(&e),
    };
    if account.endpoints.token.is_none() {
        if let Err(e) = flows::discovery::discover(&http, account).await {
            return error_response(&e);
        }
    }
    match flows::revoke::revoke_refresh(&http, account).await {
        Ok(()) => {}
        Err(Error::NoRevocationEndpoint) => {
            tracing::warn!(
                account = %name,
                "issuer does not support revocation, deleting the configuration anyway"
            );
        }
        Err(e) => return error_response(&e),
    }
    if let Err(e) = store.delete_account(name) {
        return error_response(&e);
    }
    let _ = registry.remove(name);
    tracing::debug!(account = %name, "deleted account configuration");
    Response::success()
}

async fn gen(
    agent: &Arc<Agent>,
    state: &mut AgentState,
    config: AccountRecord,
    flow: Option<Vec<Flow>>,
) -> Response {
    let mut account = config.normalized();
    let http = match client_for(&state.http, &account) {
        Ok(http) => http,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = flows::discovery::discover(&http, &mut account).await {
        return error_response(&e);
    }
    account.scope = account.usable_scope();

    let order =
        flow.unwrap_or_else(|| vec![Flow::Refresh, Flow::Password, Flow::Code, Flow::Device]);
    let mut last_err: Option<Error> = None;
    for flow in order {
        match flow {
            Flow::Refresh if account.has_refresh_token() => {
                match flows::refresh(&http, &mut account, None).await {
                    Ok(_) => return Response::success().with_config(account),
                    Err(e) => last_err = Some(e),
                }
            }
            Flow::Password if account.has_credentials() => {
                match flows::password(&http, &mut account).await {
                    Ok(()) => return Response::success().with_config(account),
                    Err(e) => last_err = Some(e),
                }
            }
            Flow::Code
                if !account.redirect_ports().is_empty()
                    && account.endpoints.authorization.is_some() =>
            {
                return start_code_flow(agent, state, account);
            }
            Flow::Device if account.device_authorization_endpoint.is_some() => {
                match flows::device::init(&http, &account).await {
                    Ok(device) => {
                        return Response::accepted().with_device(device).with_config(account)
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            _ => {}
        }
    }
    match last_err {
        Some(e) => error_response(&e),
        None => Response::failure("no flow is possible with this account configuration"),
    }
}

/// Phase A of the code flow: bind a listener, bind the state, mint the
/// authorization uri, arm the timeout.
fn start_code_flow(agent: &Arc<Agent>, state: &mut AgentState, mut account: AccountRecord) -> Response {
    account.clear_credentials();
    let ports = account.redirect_ports();
    let oauth_state = random_state();
    let port = match state
        .listeners
        .spawn(&ports, &account, &oauth_state, &state.sock_path)
    {
        Ok(port) => port,
        Err(e) => return error_response(&e),
    };
    let redirect_uri = account::port_to_uri(port);
    let uri = match flows::code::authorization_uri(&account, &redirect_uri, &oauth_state) {
        Ok(uri) => uri,
        Err(e) => {
            state.listeners.terminate(&oauth_state);
            return error_response(&e);
        }
    };
    account.used_state = Some(oauth_state.clone());
    if let Err(e) = state.registry.add(account.clone()) {
        state.listeners.terminate(&oauth_state);
        return Response::failure(e.to_string());
    }

    let agent = Arc::clone(agent);
    let expiring_state = oauth_state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(CODE_FLOW_TIMEOUT).await;
        agent.expire_state(&expiring_state).await;
    });

    Response::accepted()
        .with_code_uri(uri, oauth_state)
        .with_config(account)
}

async fn code_exchange(
    state: &mut AgentState,
    redirect_uri: &str,
    code: &str,
    oauth_state: &str,
) -> Response {
    let AgentState {
        registry,
        http,
        listeners,
        pending,
        ..
    } = state;
    let Some(account) = registry.find_by_state_mut(oauth_state) else {
        return Response::failure("no pending authorization code flow for this state");
    };
    let http = match client_for(http, account) {
        Ok(http) => http,
        Err(e) => return error_response(&e),
    };
    let result = flows::code::exchange(&http, account, code, redirect_uri).await;
    // the state is consumed by the exchange attempt, success or not
    account.used_state = None;
    let account = account.clone();
    listeners.terminate(oauth_state);
    match result {
        Ok(()) => {
            pending.insert(oauth_state.to_owned(), account.clone());
            tracing::debug!(account = %account.short_name, "code exchange succeeded");
            Response::success().with_config(account)
        }
        Err(e) => error_response(&e),
    }
}

fn state_lookup(state: &mut AgentState, oauth_state: &str) -> Response {
    if let Some(config) = state.pending.remove(oauth_state) {
        return Response::success().with_config(config);
    }
    if state.registry.find_by_state(oauth_state).is_some() {
        let mut response = Response::accepted();
        response.state = Some(oauth_state.to_owned());
        return response;
    }
    let mut response = Response::not_found();
    response.error = Some("no pending authorization code flow for this state".into());
    response
}

async fn device(state: &mut AgentState, device: &DeviceCode, config: AccountRecord) -> Response {
    let mut account = config.normalized();
    let http = match client_for(&state.http, &account) {
        Ok(http) => http,
        Err(e) => return error_response(&e),
    };
    if account.endpoints.token.is_none() {
        if let Err(e) = flows::discovery::discover(&http, &mut account).await {
            return error_response(&e);
        }
    }
    match flows::device::poll(&http, &mut account, &device.device_code).await {
        Ok(()) => Response::success().with_config(account),
        Err(e) => error_response(&e),
    }
}

async fn register(
    state: &mut AgentState,
    config: AccountRecord,
    authorization: Option<&str>,
    use_password_grant: bool,
) -> Response {
    let mut account = config.normalized();
    let http = match client_for(&state.http, &account) {
        Ok(http) => http,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = flows::discovery::discover(&http, &mut account).await {
        return error_response(&e);
    }
    account.scope = account.usable_scope();
    match flows::register::register(&http, &account, use_password_grant, authorization).await {
        Ok(client) => Response::success().with_client(client),
        Err(e) => error_response(&e),
    }
}

//! Loopback authorization-capture listeners
//!
//! For every outstanding authorization-code flow the agent runs one tiny
//! HTTP server on a port from the account's registered redirect uris.
//! The listener accepts the browser callback, correlates it by `state`,
//! submits a `code_exchange` request to the agent over a fresh IPC
//! connection, and renders one of a fixed set of HTML outcomes. A
//! matching callback terminates the listener; everything else leaves it
//! running for another attempt.

use std::{
    collections::HashMap,
    convert::Infallible,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use http::{header::CONTENT_TYPE, Method, StatusCode};
use hyper::{
    service::{make_service_fn, service_fn},
    Body,
};
use tokio::sync::Notify;

use oidc_agent_core::{account::AccountRecord, ipc::Request as IpcRequest};

use crate::{Error, Result};

mod pages {
    const STYLE: &str = "body{font-family:sans-serif;margin:4em auto;max-width:40em}";

    fn page(title: &str, body: &str) -> String {
        format!(
            "<!DOCTYPE html><html><head><title>{title}</title><style>{STYLE}</style></head>\
             <body><h1>{title}</h1><p>{body}</p></body></html>"
        )
    }

    pub fn success() -> String {
        page(
            "Success",
            "The authorization code was delivered to oidc-agent. \
             The account generation continues in the terminal; you can close this window.",
        )
    }

    pub fn wrong_state() -> String {
        page(
            "Wrong state",
            "The state of this callback does not belong to the pending authorization. \
             The request was ignored.",
        )
    }

    pub fn no_code() -> String {
        page("No code", "The callback carried neither a code nor an error.")
    }

    pub fn error(message: &str) -> String {
        page("Authorization failed", message)
    }

    pub fn code_exchange_failed(error: Option<&str>) -> String {
        match error {
            Some(error) => page("Code exchange failed", error),
            None => page(
                "Code exchange failed",
                "The agent could not redeem the authorization code.",
            ),
        }
    }
}

struct CallbackContext {
    account: AccountRecord,
    redirect_uri: String,
    state: String,
    sock_path: PathBuf,
    shutdown: Arc<Notify>,
}

fn html_response(status: StatusCode, body: String) -> http::Response<Body> {
    http::Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_else(|_| http::Response::new(Body::empty()))
}

async fn handle(
    ctx: Arc<CallbackContext>,
    request: http::Request<Body>,
) -> std::result::Result<http::Response<Body>, Infallible> {
    tracing::debug!(method = %request.method(), uri = %request.uri(), "redirect listener hit");
    if request.method() != Method::GET {
        return Ok(html_response(StatusCode::METHOD_NOT_ALLOWED, String::new()));
    }
    let params: HashMap<String, String> = request
        .uri()
        .query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    if let Some(code) = params.get("code") {
        if params.get("state").map(String::as_str) != Some(ctx.state.as_str()) {
            return Ok(html_response(StatusCode::BAD_REQUEST, pages::wrong_state()));
        }
        let exchange = IpcRequest::CodeExchange {
            config: ctx.account.clone(),
            redirect_uri: ctx.redirect_uri.clone(),
            code: code.clone(),
            state: ctx.state.clone(),
        };
        let page = match crate::api::communicate(&ctx.sock_path, &exchange).await {
            Ok(reply) if reply.is_failure() => {
                pages::code_exchange_failed(reply.error.as_deref())
            }
            Ok(_) => pages::success(),
            Err(e) => {
                tracing::error!("could not submit the code exchange to the agent: {e}");
                pages::code_exchange_failed(None)
            }
        };
        // one callback per flow: this listener is done either way
        ctx.shutdown.notify_one();
        return Ok(html_response(StatusCode::OK, page));
    }
    if let Some(error) = params.get("error") {
        let message = match params.get("error_description") {
            Some(description) => format!("{error}: {description}"),
            None => error.clone(),
        };
        return Ok(html_response(StatusCode::BAD_REQUEST, pages::error(&message)));
    }
    Ok(html_response(StatusCode::BAD_REQUEST, pages::no_code()))
}

struct Listener {
    port: u16,
    shutdown: Arc<Notify>,
}

/// The agent's registry of outstanding loopback listeners, keyed by the
/// `state` of the flow they serve.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: HashMap<String, Listener>,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start a listener for `state` on the first bindable port, and
    /// return that port.
    pub(crate) fn spawn(
        &mut self,
        ports: &[u16],
        account: &AccountRecord,
        state: &str,
        sock_path: &Path,
    ) -> Result<u16> {
        for &port in ports {
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            let builder = match hyper::Server::try_bind(&addr) {
                Ok(builder) => builder,
                Err(e) => {
                    tracing::debug!(%port, "could not bind redirect port: {e}");
                    continue;
                }
            };
            let shutdown = Arc::new(Notify::new());
            let ctx = Arc::new(CallbackContext {
                account: account.clone(),
                redirect_uri: oidc_agent_core::account::port_to_uri(port),
                state: state.to_owned(),
                sock_path: sock_path.to_owned(),
                shutdown: shutdown.clone(),
            });
            let make_svc = make_service_fn(move |_conn| {
                let ctx = ctx.clone();
                async move {
                    Ok::<_, Infallible>(service_fn(move |req| handle(ctx.clone(), req)))
                }
            });
            let graceful = shutdown.clone();
            let server = builder
                .serve(make_svc)
                .with_graceful_shutdown(async move { graceful.notified().await });
            let listener_state = state.to_owned();
            tokio::spawn(async move {
                if let Err(e) = server.await {
                    tracing::error!(state = %listener_state, "redirect listener failed: {e}");
                }
                tracing::debug!(state = %listener_state, "redirect listener stopped");
            });
            tracing::debug!(%port, %state, "started redirect listener");
            self.listeners.insert(state.to_owned(), Listener { port, shutdown });
            return Ok(port);
        }
        Err(Error::HttpServerStart)
    }

    /// Signal the listener for `state` to shut down and forget it.
    pub(crate) fn terminate(&mut self, state: &str) {
        if let Some(listener) = self.listeners.remove(state) {
            tracing::debug!(%state, port = %listener.port, "terminating redirect listener");
            listener.shutdown.notify_one();
        }
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        for listener in self.listeners.values() {
            listener.shutdown.notify_one();
        }
    }
}

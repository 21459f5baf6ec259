//! The agent process: registry, dispatcher, and front door
//!
//! One [`Agent`] owns the loaded accounts, the loopback listeners, and
//! the HTTPS client, all behind a single async mutex: requests from any
//! number of IPC connections interleave at request granularity only,
//! which is what keeps the registry invariants trivially true.

mod dispatch;
mod redirect;
mod registry;
pub mod server;

pub use registry::{Registry, RegistryError};

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use tokio::sync::Mutex;

use oidc_agent_core::account::AccountRecord;

use crate::{http::HttpClient, store::ConfigStore};

/// How long a minted authorization-code uri stays redeemable before the
/// listener is torn down and the state unbound.
const CODE_FLOW_TIMEOUT: Duration = Duration::from_secs(600);

/// The agent: dispatcher state behind one lock.
pub struct Agent {
    state: Mutex<AgentState>,
}

pub(crate) struct AgentState {
    registry: Registry,
    store: ConfigStore,
    http: HttpClient,
    listeners: redirect::ListenerSet,
    /// Completed code exchanges awaiting `state_lookup`, keyed by state.
    pending: HashMap<String, AccountRecord>,
    sock_path: PathBuf,
}

impl Agent {
    /// Assemble an agent around a config store, an HTTPS client, and the
    /// socket path it will be reachable under (the loopback listeners
    /// call back through that socket).
    pub fn new(store: ConfigStore, http: HttpClient, sock_path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AgentState {
                registry: Registry::new(),
                store,
                http,
                listeners: redirect::ListenerSet::new(),
                pending: HashMap::new(),
                sock_path,
            }),
        })
    }

    /// Load an account record directly into the registry.
    ///
    /// In-process embedders and tests use this; IPC clients go through
    /// the `add` request, which also decrypts and discovers.
    pub async fn load_account(&self, account: AccountRecord) -> Result<(), RegistryError> {
        self.state.lock().await.registry.add(account)
    }

    /// Tear down an expired authorization-code flow: terminate its
    /// listener, unbind its state, drop any unclaimed result.
    pub(crate) async fn expire_state(&self, state: &str) {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        st.listeners.terminate(state);
        st.pending.remove(state);
        if let Ok(account) = st.registry.unbind_state(state) {
            tracing::debug!(
                account = %account.short_name,
                "authorization code flow timed out"
            );
        }
    }
}

/// The default socket path: a per-process directory under the system
/// temp dir, created by [`server::bind`] with owner-only permissions.
pub fn default_socket_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("oidc-agent-{}", std::process::id()))
        .join("oidc-agent.sock")
}

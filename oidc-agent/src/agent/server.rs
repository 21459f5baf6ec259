//! The IPC front door: a per-user UNIX socket speaking line-framed JSON
//!
//! Each request is one JSON object on one line; each response is the
//! same. A final line without its newline is still accepted at EOF.
//! Malformed JSON gets a `Bad Request` failure and the connection is
//! closed; within a connection requests are served strictly in order.

use std::{os::unix::fs::PermissionsExt, path::Path, sync::Arc};

use futures::StreamExt;
use tokio::{
    io::AsyncWriteExt,
    net::{UnixListener, UnixStream},
};
use tokio_util::codec::{FramedRead, LinesCodec};

use oidc_agent_core::ipc::{Request, Response};

use crate::{agent::Agent, Error, Result};

/// Bind the agent's UNIX socket, creating its directory with owner-only
/// permissions and replacing a stale socket file from a previous run.
pub fn bind(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::Connection)?;
        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
            .map_err(Error::Connection)?;
    }
    if path.exists() {
        std::fs::remove_file(path).map_err(Error::Connection)?;
    }
    let listener = UnixListener::bind(path).map_err(Error::Connection)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(Error::Connection)?;
    Ok(listener)
}

/// Accept connections forever, serving each on its own task. Returns
/// only when accepting itself fails, which is fatal to the agent.
pub async fn run(agent: Arc<Agent>, listener: UnixListener) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await.map_err(Error::Connection)?;
        let agent = Arc::clone(&agent);
        tokio::spawn(serve_connection(agent, stream));
    }
}

async fn serve_connection(agent: Arc<Agent>, stream: UnixStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut requests = FramedRead::new(read_half, LinesCodec::new());
    while let Some(line) = requests.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!("ipc read failed: {e}");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let (response, close) = match serde_json::from_str::<Request>(&line) {
            Ok(request) => (Arc::clone(&agent).handle(request).await, false),
            Err(e) => {
                tracing::debug!("malformed ipc request: {e}");
                (Response::failure(format!("Bad Request: {e}")), true)
            }
        };
        let mut encoded = match serde_json::to_string(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("could not encode ipc response: {e}");
                return;
            }
        };
        encoded.push('\n');
        if write_half.write_all(encoded.as_bytes()).await.is_err() {
            // client went away; a reply in flight is simply dropped
            return;
        }
        if close {
            return;
        }
    }
}

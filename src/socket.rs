use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

/// Local push socket for UI clients, per `spec.md` §6: newline-delimited
/// JSON messages `{"type": "insight", "timestamp": RFC3339, "payload": {…}}`.
/// Broadcast-only — clients connect and read, nothing is read back.
#[derive(Serialize)]
pub struct PushMessage<'a, T: Serialize> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: T,
}

#[cfg(unix)]
mod platform {
    use std::path::{Path, PathBuf};

    pub fn socket_path(data_dir: &Path) -> PathBuf {
        data_dir.join("mnemosyne.sock")
    }

    pub async fn bind(path: &Path) -> anyhow::Result<tokio::net::UnixListener> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let old_umask = unsafe { libc::umask(0o177) };
        let result = tokio::net::UnixListener::bind(path);
        unsafe { libc::umask(old_umask) };
        Ok(result?)
    }

    pub type Conn = tokio::net::unix::OwnedWriteHalf;

    pub async fn accept_loop(
        listener: tokio::net::UnixListener,
        clients: super::Clients,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let (_read, write) = stream.into_split();
                    clients.lock().await.push(write);
                }
                Err(e) => log::warn!("push socket accept error: {e}"),
            }
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use std::path::{Path, PathBuf};

    pub fn socket_path(data_dir: &Path) -> PathBuf {
        data_dir.join("mnemosyne.sock")
    }

    pub struct Unsupported;

    pub async fn bind(_path: &Path) -> anyhow::Result<Unsupported> {
        anyhow::bail!("local push socket is not implemented on this platform")
    }

    pub type Conn = tokio::io::Sink;

    pub async fn accept_loop(_listener: Unsupported, _clients: super::Clients) {}
}

pub type Clients = Arc<Mutex<Vec<platform::Conn>>>;

/// Owns the accept loop and the set of connected clients. `broadcast`
/// fans a single message out to every connected writer, dropping any
/// that have disconnected.
pub struct PushSocket {
    clients: Clients,
}

impl PushSocket {
    /// Binds the socket and spawns its accept loop in the background.
    /// Returns `Ok(None)` rather than an error on platforms without a
    /// supported transport, so callers can treat the feature as optional.
    pub async fn bind(data_dir: &std::path::Path) -> anyhow::Result<Option<Self>> {
        let path = platform::socket_path(data_dir);
        let listener = match platform::bind(&path).await {
            Ok(listener) => listener,
            Err(e) => {
                log::warn!("push socket unavailable: {e}");
                return Ok(None);
            }
        };
        let clients: Clients = Arc::new(Mutex::new(Vec::new()));
        let accept_clients = clients.clone();
        tokio::spawn(async move {
            platform::accept_loop(listener, accept_clients).await;
        });
        Ok(Some(Self { clients }))
    }

    pub async fn broadcast<T: Serialize>(&self, kind: &str, payload: T) {
        use tokio::io::AsyncWriteExt;

        let message = PushMessage {
            kind,
            timestamp: chrono::Utc::now(),
            payload,
        };
        let mut line = match serde_json::to_string(&message) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("failed to serialize push message: {e}");
                return;
            }
        };
        line.push('\n');

        let mut clients = self.clients.lock().await;
        let mut alive = Vec::with_capacity(clients.len());
        for mut client in clients.drain(..) {
            if client.write_all(line.as_bytes()).await.is_ok() {
                alive.push(client);
            }
        }
        *clients = alive;
    }
}

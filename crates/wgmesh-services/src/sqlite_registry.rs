//! SQLite-backed registry.
//!
//! Every node of a mesh opens the same database file. SQLite's file locking
//! serializes writers across processes; the busy timeout makes a node wait
//! for a concurrent writer instead of failing the cycle.

use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use wgmesh_core::{Endpoint, Peer, PublicKey};

use crate::registry::{Registry, RegistryError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS peers (
    interface   TEXT NOT NULL,
    public_key  BLOB NOT NULL,
    endpoint    TEXT NOT NULL,
    address     TEXT NOT NULL,
    updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (interface, public_key)
);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRegistry {
    /// Open (or create) the registry database at `path`.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RegistryError::Unavailable(format!("create {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// A private in-memory database. Not shared between processes.
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RegistryError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, RegistryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| RegistryError::Unavailable("connection lock poisoned".into()))?;
            f(&*guard)
        })
        .await
        .map_err(|e| RegistryError::Unavailable(format!("registry task failed: {e}")))?
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn join(&self, interface: &str, peer: &Peer) -> Result<(), RegistryError> {
        let interface = interface.to_string();
        let key = peer.public_key.as_bytes().to_vec();
        let endpoint = peer.endpoint.to_string();
        let address = peer.address.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO peers (interface, public_key, endpoint, address)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (interface, public_key) DO UPDATE SET
                     endpoint = excluded.endpoint,
                     address = excluded.address,
                     updated_at = strftime('%s', 'now')",
                params![interface, key, endpoint, address],
            )?;
            Ok(())
        })
        .await
    }

    async fn leave(&self, interface: &str, peer: &Peer) -> Result<(), RegistryError> {
        let interface = interface.to_string();
        let key = peer.public_key.as_bytes().to_vec();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM peers WHERE interface = ?1 AND public_key = ?2",
                params![interface, key],
            )?;
            Ok(())
        })
        .await
    }

    async fn peers(&self, interface: &str) -> Result<Vec<Peer>, RegistryError> {
        let interface = interface.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT public_key, endpoint, address FROM peers WHERE interface = ?1",
            )?;
            let rows = stmt.query_map(params![interface], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut peers = Vec::new();
            for row in rows {
                let (key, endpoint, address) = row?;
                peers.push(decode_row(&key, &endpoint, &address)?);
            }
            Ok(peers)
        })
        .await
    }
}

fn decode_row(key: &[u8], endpoint: &str, address: &str) -> Result<Peer, RegistryError> {
    let public_key = PublicKey::from_slice(key).map_err(|e| RegistryError::Corrupt {
        key: format!("<{} bytes>", key.len()),
        reason: e.to_string(),
    })?;
    let corrupt = |reason: String| RegistryError::Corrupt {
        key: public_key.to_string(),
        reason,
    };
    let endpoint: Endpoint = endpoint.parse().map_err(|e| corrupt(format!("{e}")))?;
    let address: IpAddr = address
        .parse()
        .map_err(|e| corrupt(format!("address {address:?}: {e}")))?;
    Ok(Peer {
        public_key,
        endpoint,
        address,
    })
}

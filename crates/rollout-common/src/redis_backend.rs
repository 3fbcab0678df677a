//! Redis object store and status client.
//!
//! Each object is a hash at `rollout|<plural>|<namespace>|<name>` with two
//! fields: `version` (the resource version) and `body` (the JSON encoded
//! object). Versions come from a single `INCR` counter so they are unique
//! across the whole database.
//!
//! Creates and updates run as Lua scripts that compare the stored version
//! before writing, which gives compare-and-swap semantics on a shared
//! multiplexed connection where `WATCH` would not be safe.
//!
//! Watches are polling informers: the key space is re-listed every
//! `poll_interval` and differences are reported as watch events.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Interval;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::object::{ResourceKind, StoredObject, WatchEvent, WatchEventType};
use crate::status::{OperatorSpec, OperatorStatus, StatusSnapshot, VersionToken};
use crate::store::{ObjectStore, StatusClient, StatusWatchStream, WatchStream};

/// Prefix shared by every key this backend writes.
pub const KEY_PREFIX: &str = "rollout";

/// Default polling interval for watches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const WATCH_BUFFER: usize = 256;

const CREATE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'version', ARGV[1], 'body', ARGV[2])
return 1
";

const UPDATE_SCRIPT: &str = r"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then
  return -1
end
if current ~= ARGV[1] then
  return 0
end
redis.call('HSET', KEYS[1], 'version', ARGV[2], 'body', ARGV[3])
return 1
";

/// Configuration for a Redis connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Redis server hostname or IP
    pub host: String,
    /// Redis server port
    pub port: u16,
    /// Database index
    pub db: u32,
}

impl RedisConfig {
    /// Creates a new Redis configuration.
    pub fn new(host: impl Into<String>, port: u16, db: u32) -> Self {
        Self {
            host: host.into(),
            port,
            db,
        }
    }

    /// Returns the Redis connection URI.
    pub fn uri(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 6379, 0)
    }
}

/// Opens a managed connection.
pub async fn connect(config: &RedisConfig) -> StoreResult<ConnectionManager> {
    let uri = config.uri();
    let client = redis::Client::open(uri.clone())
        .map_err(|e| StoreError::transport("connect", format!("{uri}: {e}")))?;
    let connection = client.get_connection_manager().await.map_err(|e| {
        StoreError::transport("connect", format!("Failed to create connection pool: {e}"))
    })?;

    info!("Connected to Redis: {}:{} (db={})", config.host, config.port, config.db);
    Ok(connection)
}

fn object_key(kind: ResourceKind, namespace: &str, name: &str) -> String {
    format!("{}|{}|{}|{}", KEY_PREFIX, kind.plural(), namespace, name)
}

fn object_pattern(kind: ResourceKind, namespace: &str) -> String {
    format!("{}|{}|{}|*", KEY_PREFIX, kind.plural(), namespace)
}

fn version_counter_key() -> String {
    format!("{KEY_PREFIX}|resource-version")
}

fn status_key(operator: &str) -> String {
    format!("{KEY_PREFIX}|status|{operator}")
}

/// Interprets a compare-and-set script reply.
fn script_outcome(reply: i64) -> CasOutcome {
    match reply {
        1 => CasOutcome::Written,
        0 => CasOutcome::Stale,
        _ => CasOutcome::Missing,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CasOutcome {
    Written,
    Stale,
    Missing,
}

/// Object store backed by Redis hashes.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    poll_interval: Duration,
}

impl RedisStore {
    /// Connects to Redis.
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        Ok(Self::new(connect(config).await?))
    }

    /// Wraps an existing managed connection.
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how often watches re-list the key space.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn next_version(&self) -> StoreResult<String> {
        let mut conn = self.connection.clone();
        let version: u64 = conn.incr(version_counter_key(), 1u64).await?;
        Ok(version.to_string())
    }

    async fn snapshot_versions(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> StoreResult<HashMap<String, StoredObject>> {
        Ok(self
            .list(kind, namespace)
            .await?
            .into_iter()
            .map(|obj| (obj.meta.name.clone(), obj))
            .collect())
    }
}

#[async_trait]
impl ObjectStore for RedisStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> StoreResult<StoredObject> {
        let mut conn = self.connection.clone();
        let body: Option<String> = conn.hget(object_key(kind, namespace, name), "body").await?;
        match body {
            Some(body) => Ok(serde_json::from_str(&body)?),
            None => Err(StoreError::not_found(kind, name)),
        }
    }

    async fn create(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        object.meta.uid = uuid::Uuid::new_v4().to_string();
        object.meta.resource_version = self.next_version().await?;
        let body = serde_json::to_string(&object)?;

        let mut conn = self.connection.clone();
        let reply: i64 = Script::new(CREATE_SCRIPT)
            .key(object_key(object.kind, &object.meta.namespace, &object.meta.name))
            .arg(&object.meta.resource_version)
            .arg(body)
            .invoke_async(&mut conn)
            .await?;

        match script_outcome(reply) {
            CasOutcome::Written => {
                debug!(kind = %object.kind, name = %object.meta.name, "Created object");
                Ok(object)
            }
            _ => Err(StoreError::already_exists(object.kind, object.meta.name)),
        }
    }

    async fn update(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        let key = object_key(object.kind, &object.meta.namespace, &object.meta.name);
        let presented = object.meta.resource_version.clone();
        object.meta.resource_version = self.next_version().await?;
        let body = serde_json::to_string(&object)?;

        let mut conn = self.connection.clone();
        let reply: i64 = Script::new(UPDATE_SCRIPT)
            .key(key)
            .arg(&presented)
            .arg(&object.meta.resource_version)
            .arg(body)
            .invoke_async(&mut conn)
            .await?;

        match script_outcome(reply) {
            CasOutcome::Written => Ok(object),
            CasOutcome::Stale => Err(StoreError::object_conflict(
                object.kind,
                &object.meta.name,
                format!("the object has been modified; presented version {presented}"),
            )),
            CasOutcome::Missing => Err(StoreError::not_found(object.kind, object.meta.name)),
        }
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> StoreResult<Vec<StoredObject>> {
        let mut conn = self.connection.clone();
        let keys: Vec<String> = conn.keys(object_pattern(kind, namespace)).await?;

        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            let body: Option<String> = conn.hget(&key, "body").await?;
            // Deleted between KEYS and HGET
            if let Some(body) = body {
                objects.push(serde_json::from_str(&body)?);
            }
        }
        Ok(objects)
    }

    async fn watch(&self, kind: ResourceKind, namespace: &str) -> StoreResult<WatchStream> {
        let mut known = self.snapshot_versions(kind, namespace).await?;
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let store = self.clone();
        let namespace = namespace.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.poll_interval);
            ticker.tick().await;
            while next_poll(&mut ticker, &tx).await {
                let current = match store.snapshot_versions(kind, &namespace).await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(kind = %kind, error = %e, "Watch poll failed");
                        continue;
                    }
                };

                for event in diff_snapshots(&known, &current) {
                    if tx.send(event).await.is_err() {
                        debug!(kind = %kind, "Watch receiver dropped; stopping poller");
                        return;
                    }
                }
                known = current;
            }
            debug!(kind = %kind, "Watch receiver dropped; stopping poller");
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Waits for the next poll; false once the watch stream has been dropped.
async fn next_poll<T>(ticker: &mut Interval, tx: &mpsc::Sender<T>) -> bool {
    tokio::select! {
        _ = tx.closed() => false,
        _ = ticker.tick() => true,
    }
}

/// Computes the watch events that turn `before` into `after`.
fn diff_snapshots(
    before: &HashMap<String, StoredObject>,
    after: &HashMap<String, StoredObject>,
) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    for (name, obj) in after {
        match before.get(name) {
            None => events.push(WatchEvent::new(WatchEventType::Added, obj.clone())),
            Some(old) if old.meta.resource_version != obj.meta.resource_version => {
                events.push(WatchEvent::new(WatchEventType::Modified, obj.clone()))
            }
            Some(_) => {}
        }
    }
    for (name, obj) in before {
        if !after.contains_key(name) {
            events.push(WatchEvent::new(WatchEventType::Deleted, obj.clone()));
        }
    }
    events
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatusDocument {
    #[serde(default)]
    spec: OperatorSpec,
    #[serde(default)]
    status: OperatorStatus,
}

/// Status singleton backed by a Redis hash.
#[derive(Clone)]
pub struct RedisStatusClient {
    connection: ConnectionManager,
    key: String,
    poll_interval: Duration,
}

impl RedisStatusClient {
    /// Connects and makes sure the singleton exists.
    pub async fn connect(config: &RedisConfig, operator: &str) -> StoreResult<Self> {
        let client = Self::new(connect(config).await?, operator);
        client.ensure_exists().await?;
        Ok(client)
    }

    /// Wraps an existing managed connection.
    pub fn new(connection: ConnectionManager, operator: &str) -> Self {
        Self {
            connection,
            key: status_key(operator),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how often the status watch polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Creates a default managed status at version 1 if none is stored.
    pub async fn ensure_exists(&self) -> StoreResult<()> {
        let body = serde_json::to_string(&StatusDocument::default())?;
        let mut conn = self.connection.clone();
        let reply: i64 = Script::new(CREATE_SCRIPT)
            .key(&self.key)
            .arg("1")
            .arg(body)
            .invoke_async(&mut conn)
            .await?;
        if script_outcome(reply) == CasOutcome::Written {
            info!(key = %self.key, "Initialized operator status");
        }
        Ok(())
    }

    async fn current_version(&self) -> StoreResult<Option<String>> {
        let mut conn = self.connection.clone();
        Ok(conn.hget(&self.key, "version").await?)
    }
}

#[async_trait]
impl StatusClient for RedisStatusClient {
    async fn get(&self) -> StoreResult<StatusSnapshot> {
        let mut conn = self.connection.clone();
        let (version, body): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(&self.key)
            .arg("version")
            .arg("body")
            .query_async(&mut conn)
            .await?;

        match (version, body) {
            (Some(version), Some(body)) => {
                let doc: StatusDocument = serde_json::from_str(&body)?;
                Ok(StatusSnapshot {
                    spec: doc.spec,
                    status: doc.status,
                    version: VersionToken::new(version),
                })
            }
            _ => Err(StoreError::transport(
                "get_status",
                format!("status object {} is missing", self.key),
            )),
        }
    }

    async fn update_status(
        &self,
        version: &VersionToken,
        status: OperatorStatus,
    ) -> StoreResult<VersionToken> {
        // The operator spec is never written here; keep the stored one.
        let current = self.get().await?;
        if &current.version != version {
            return Err(StoreError::status_conflict(format!(
                "stored version {}, presented {}",
                current.version, version
            )));
        }

        let next = version
            .as_str()
            .parse::<u64>()
            .map(|v| v.saturating_add(1).to_string())
            .map_err(|e| StoreError::transport("update_status", format!("bad version: {e}")))?;
        let body = serde_json::to_string(&StatusDocument {
            spec: current.spec,
            status,
        })?;

        let mut conn = self.connection.clone();
        let reply: i64 = Script::new(UPDATE_SCRIPT)
            .key(&self.key)
            .arg(version.as_str())
            .arg(&next)
            .arg(body)
            .invoke_async(&mut conn)
            .await?;

        match script_outcome(reply) {
            CasOutcome::Written => Ok(VersionToken::new(next)),
            CasOutcome::Stale => Err(StoreError::status_conflict(format!(
                "the object has been modified; presented version {version}"
            ))),
            CasOutcome::Missing => Err(StoreError::transport(
                "update_status",
                format!("status object {} is missing", self.key),
            )),
        }
    }

    async fn watch(&self) -> StoreResult<StatusWatchStream> {
        let mut known = self.current_version().await?;
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let client = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.poll_interval);
            ticker.tick().await;
            while next_poll(&mut ticker, &tx).await {
                let current = match client.current_version().await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(error = %e, "Status watch poll failed");
                        continue;
                    }
                };
                if current != known {
                    if let Some(version) = &current {
                        if tx.send(VersionToken::new(version.clone())).await.is_err() {
                            return;
                        }
                    }
                    known = current;
                }
            }
            debug!("Status watch receiver dropped; stopping poller");
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

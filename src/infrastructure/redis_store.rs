//! Redis-backed notification store.
//!
//! Lets several engine instances share one set of notifications.
//!
//! ## Key layout
//!
//! With the default prefix `notifications:`:
//! - `notifications:n:{id}`: the record, as JSON
//! - `notifications:user:{user}`: set of the user's record ids
//! - `notifications:expiry`: sorted set of ids scored by expiry (ms)
//! - `notifications:dedup:{key}`: id of the record collecting a dedup key,
//!   expiring with that record
//! - `notifications:sweep-lease`: current sweep lease holder
//! - `notifications:mark:{json}`: a claimed milestone mark, expiring once
//!   it no longer matters
//!
//! ## Atomicity
//!
//! Every write that touches more than one key runs as a Lua script. Record
//! rewrites are compare-and-swap against the JSON that was read; a lost race
//! is retried a few times and then reported as `StoreError::Conflict`.
//!
//! ## Limitations
//!
//! - The sweep lease expires on the Redis server clock, not the engine clock.
//! - `list` and counts read every record id of the user.
//!
//! ## Example
//!
//! ```rust,ignore
//! use notification_engine::{NotificationEngine, RedisStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let engine = NotificationEngine::builder()
//!         .with_store(Arc::new(store))
//!         .build()
//!         .unwrap();
//! }
//! ```

use crate::application::ports::{NotificationStore, StoreError};
use crate::domain::admission::{AdmitOutcome, AdmitRequest};
use crate::domain::dedup::DedupKey;
use crate::domain::listing::{paginate, ListQuery, Page};
use crate::domain::notification::{Notification, NotificationId, NotificationPatch, UserId};
use crate::domain::rules::MilestoneMark;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const MAX_CAS_ATTEMPTS: usize = 5;

// KEYS: dedup pointer, record, user set, expiry zset
// ARGV: guarded ('1'|'0'), expected pointer ('' = none), id, json, pointer ttl ms ('0' = none), expiry score ('' = none)
const INSERT_SCRIPT: &str = r"
local guarded = ARGV[1] == '1'
if guarded then
  local current = redis.call('GET', KEYS[1])
  if (current or '') ~= ARGV[2] then return 0 end
end
if redis.call('SETNX', KEYS[2], ARGV[4]) == 0 then return -1 end
redis.call('SADD', KEYS[3], ARGV[3])
if ARGV[6] ~= '' then redis.call('ZADD', KEYS[4], ARGV[6], ARGV[3]) end
if guarded then
  if ARGV[5] == '0' then
    redis.call('SET', KEYS[1], ARGV[3])
  else
    redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[5])
  end
end
return 1
";

// KEYS: record, expiry zset
// ARGV: expected json, new json, id, expiry score ('' = none)
const SWAP_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then return -1 end
if current ~= ARGV[1] then return 0 end
redis.call('SET', KEYS[1], ARGV[2])
if ARGV[4] ~= '' then
  redis.call('ZADD', KEYS[2], ARGV[4], ARGV[3])
else
  redis.call('ZREM', KEYS[2], ARGV[3])
end
return 1
";

// KEYS: record, user set, expiry zset, dedup pointer
// ARGV: id
const DELETE_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then return false end
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
if redis.call('GET', KEYS[4]) == ARGV[1] then redis.call('DEL', KEYS[4]) end
return current
";

// KEYS: lease; ARGV: holder, ttl ms
const ACQUIRE_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if (not current) or current == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
  return 1
end
return 0
";

// KEYS: lease; ARGV: holder
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then return redis.call('DEL', KEYS[1]) end
return 0
";

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// What is stored under a record key: the public record plus its dedup key.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    #[serde(flatten)]
    notification: Notification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dedup_key: Option<u64>,
}

fn encode(notification: &Notification) -> Result<String, StoreError> {
    let stored = StoredRecord {
        notification: notification.clone(),
        dedup_key: notification.dedup_key.map(|k| k.as_u64()),
    };
    Ok(serde_json::to_string(&stored)?)
}

fn decode(json: &str) -> Result<Notification, StoreError> {
    let stored: StoredRecord = serde_json::from_str(json)?;
    let mut notification = stored.notification;
    notification.dedup_key = stored.dedup_key.map(DedupKey::from_u64);
    Ok(notification)
}

fn expiry_score(notification: &Notification) -> String {
    notification
        .expires_at
        .map(|at| at.timestamp_millis().to_string())
        .unwrap_or_default()
}

/// Configuration for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix for every key (default: "notifications:")
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "notifications:".to_string(),
        }
    }
}

#[derive(Clone)]
struct Scripts {
    insert: Script,
    swap: Script,
    delete: Script,
    acquire: Script,
    release: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            insert: Script::new(INSERT_SCRIPT),
            swap: Script::new(SWAP_SCRIPT),
            delete: Script::new(DELETE_SCRIPT),
            acquire: Script::new(ACQUIRE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

/// [`NotificationStore`] shared through Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    scripts: Scripts,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect with the default key prefix.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            config,
            scripts: Scripts::new(),
        })
    }

    fn record_key(&self, id: NotificationId) -> String {
        format!("{}n:{}", self.config.key_prefix, id)
    }

    fn user_key(&self, user: &UserId) -> String {
        format!("{}user:{}", self.config.key_prefix, user)
    }

    fn expiry_key(&self) -> String {
        format!("{}expiry", self.config.key_prefix)
    }

    fn dedup_key(&self, key: Option<DedupKey>) -> String {
        match key {
            Some(key) => format!("{}dedup:{}", self.config.key_prefix, key),
            // Placeholder so scripts always get the same key count.
            None => format!("{}dedup:none", self.config.key_prefix),
        }
    }

    fn lease_key(&self) -> String {
        format!("{}sweep-lease", self.config.key_prefix)
    }

    fn mark_key(&self, mark: &MilestoneMark) -> Result<String, StoreError> {
        Ok(format!(
            "{}mark:{}",
            self.config.key_prefix,
            serde_json::to_string(mark)?
        ))
    }

    async fn read_raw(&self, id: NotificationId) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let json: Option<String> = conn.get(self.record_key(id)).await?;
        Ok(json)
    }

    async fn owned_by(&self, user: &UserId) -> Result<Vec<Notification>, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.smembers(self.user_key(user)).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{}n:{}", self.config.key_prefix, id))
            .collect();
        let records: Vec<Option<String>> = conn.mget(keys).await?;

        let mut owned = Vec::with_capacity(records.len());
        for json in records.into_iter().flatten() {
            match decode(&json) {
                Ok(n) => owned.push(n),
                Err(error) => tracing::warn!(%error, user_id = %user, "skipping unreadable record"),
            }
        }
        Ok(owned)
    }

    /// Insert `notification`, optionally claiming its dedup pointer.
    ///
    /// With `expected_pointer`, the insert only happens while the pointer
    /// still holds that value (`None` meaning absent). Returns `false` if it
    /// moved.
    async fn insert(
        &self,
        notification: &Notification,
        expected_pointer: Option<Option<String>>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if notification.user_id.is_empty() {
            return Err(StoreError::InvalidRecord(
                "notification has no owner".to_string(),
            ));
        }
        let json = encode(notification)?;
        let pointer_ttl = notification
            .expires_at
            .map(|at| (at - now).num_milliseconds().max(1))
            .unwrap_or(0);
        let (guarded, expected) = match expected_pointer {
            Some(expected) => ("1", expected.unwrap_or_default()),
            None => ("0", String::new()),
        };

        let mut conn = self.connection.clone();
        let result: i64 = self
            .scripts
            .insert
            .key(self.dedup_key(notification.dedup_key))
            .key(self.record_key(notification.id))
            .key(self.user_key(&notification.user_id))
            .key(self.expiry_key())
            .arg(guarded)
            .arg(expected)
            .arg(notification.id.to_string())
            .arg(json)
            .arg(pointer_ttl)
            .arg(expiry_score(notification))
            .invoke_async(&mut conn)
            .await?;

        match result {
            1 => Ok(true),
            0 => Ok(false),
            _ => Err(StoreError::Conflict(notification.id)),
        }
    }

    /// Replace the record if it still serializes to `expected`.
    async fn swap(
        &self,
        expected: &str,
        updated: &Notification,
    ) -> Result<bool, StoreError> {
        let json = encode(updated)?;
        let mut conn = self.connection.clone();
        let result: i64 = self
            .scripts
            .swap
            .key(self.record_key(updated.id))
            .key(self.expiry_key())
            .arg(expected)
            .arg(json)
            .arg(updated.id.to_string())
            .arg(expiry_score(updated))
            .invoke_async(&mut conn)
            .await?;

        match result {
            1 => Ok(true),
            0 => Ok(false),
            _ => Err(StoreError::NotFound(updated.id)),
        }
    }

    async fn remove(&self, notification: &Notification) -> Result<Option<Notification>, StoreError> {
        let mut conn = self.connection.clone();
        let removed: Option<String> = self
            .scripts
            .delete
            .key(self.record_key(notification.id))
            .key(self.user_key(&notification.user_id))
            .key(self.expiry_key())
            .key(self.dedup_key(notification.dedup_key))
            .arg(notification.id.to_string())
            .invoke_async(&mut conn)
            .await?;
        removed.as_deref().map(decode).transpose()
    }

    /// Read, modify, compare-and-swap; retried on concurrent change.
    async fn modify<F>(&self, id: NotificationId, mut change: F) -> Result<Notification, StoreError>
    where
        F: FnMut(&mut Notification) -> Result<(), StoreError> + Send,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let json = self.read_raw(id).await?.ok_or(StoreError::NotFound(id))?;
            let mut record = decode(&json)?;
            change(&mut record)?;
            if self.swap(&json, &record).await? {
                return Ok(record);
            }
        }
        Err(StoreError::Conflict(id))
    }
}

#[async_trait]
impl NotificationStore for RedisStore {
    async fn create(
        &self,
        notification: Notification,
        now: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        let claim = notification.dedup_key.map(|_| None);
        if self.insert(&notification, claim, now).await? {
            Ok(notification)
        } else {
            // Another record holds the dedup pointer; keep it unindexed.
            let mut unindexed = notification;
            unindexed.dedup_key = None;
            self.insert(&unindexed, None, now).await?;
            Ok(unindexed)
        }
    }

    async fn upsert_aggregate(
        &self,
        request: AdmitRequest,
        now: DateTime<Utc>,
    ) -> Result<AdmitOutcome, StoreError> {
        let Some(key) = request.dedup_key() else {
            self.insert(&request.notification, None, now).await?;
            return Ok(AdmitOutcome::Created(request.notification));
        };
        let pointer_key = self.dedup_key(Some(key));

        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut conn = self.connection.clone();
            let pointer: Option<String> = conn.get(&pointer_key).await?;

            if let Some(existing_id) = pointer.as_deref().and_then(|id| id.parse().ok()) {
                if let Some(json) = self.read_raw(existing_id).await? {
                    let mut existing = decode(&json)?;
                    if request.can_merge_into(&existing, now) {
                        request.merge_into(&mut existing, now);
                        if self.swap(&json, &existing).await? {
                            return Ok(AdmitOutcome::Merged(existing));
                        }
                        continue;
                    }
                }
            }

            if self
                .insert(&request.notification, Some(pointer.clone()), now)
                .await?
            {
                return Ok(AdmitOutcome::Created(request.notification));
            }
        }
        Err(StoreError::Conflict(request.notification.id))
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        self.read_raw(id).await?.as_deref().map(decode).transpose()
    }

    async fn update(
        &self,
        id: NotificationId,
        patch: NotificationPatch,
        now: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        self.modify(id, |record| {
            record
                .apply_patch(patch.clone(), now)
                .map_err(StoreError::from)
        })
        .await
    }

    async fn list(
        &self,
        user: &UserId,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page, StoreError> {
        Ok(paginate(self.owned_by(user).await?, query, now))
    }

    async fn count_unread(&self, user: &UserId, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let count = self
            .owned_by(user)
            .await?
            .iter()
            .filter(|n| !n.is_read && !n.is_expired(now))
            .count();
        Ok(count as u64)
    }

    async fn mark_all_read(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        let unread: Vec<NotificationId> = self
            .owned_by(user)
            .await?
            .into_iter()
            .filter(|n| !n.is_read && !n.is_expired(now))
            .map(|n| n.id)
            .collect();

        let mut changed = Vec::with_capacity(unread.len());
        for id in unread {
            let mut flipped = false;
            let result = self
                .modify(id, |record| {
                    flipped = record.mark_read(now);
                    Ok(())
                })
                .await;
            match result {
                Ok(record) if flipped => changed.push(record),
                Ok(_) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(changed)
    }

    async fn delete(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        match self.get(id).await? {
            Some(record) => self.remove(&record).await,
            None => Ok(None),
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let upper = format!("({}", now.timestamp_millis());
        let ids: Vec<String> = conn
            .zrangebyscore(self.expiry_key(), "-inf", upper)
            .await?;

        let mut deleted = 0;
        for raw in ids {
            let Ok(id) = raw.parse::<NotificationId>() else {
                let _: i64 = conn.zrem(self.expiry_key(), &raw).await?;
                continue;
            };
            if let Some(record) = self.get(id).await? {
                if record.is_expired(now) && self.remove(&record).await?.is_some() {
                    deleted += 1;
                }
            } else {
                let _: i64 = conn.zrem(self.expiry_key(), &raw).await?;
            }
        }
        Ok(deleted)
    }

    async fn try_acquire_sweep_lease(
        &self,
        holder: &str,
        ttl: Duration,
        _now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let acquired: i64 = self
            .scripts
            .acquire
            .key(self.lease_key())
            .arg(holder)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(acquired == 1)
    }

    async fn release_sweep_lease(&self, holder: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = self
            .scripts
            .release
            .key(self.lease_key())
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn claim_milestone(
        &self,
        mark: &MilestoneMark,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut set = redis::cmd("SET");
        set.arg(self.mark_key(mark)?).arg(now.timestamp_millis()).arg("NX");
        if let Some(until) = mark.retain_until() {
            set.arg("PX").arg((until - now).num_milliseconds().max(1));
        }
        let mut conn = self.connection.clone();
        let reply: Option<String> = set.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn release_milestone(&self, mark: &MilestoneMark) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(self.mark_key(mark)?).await?;
        Ok(())
    }
}

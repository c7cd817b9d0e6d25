// src/storage/redis.rs

use crate::error::{AppError, Entity, Result};
use crate::storage::{
    BackupCredential, BackupFilter, BackupStore, Binding, BindingStore, Credential,
    CredentialStatus, CredentialStore, Provider,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deadpool_redis::{Connection as RedisConnection, Pool};
use once_cell::sync::Lazy;
use redis::{AsyncCommands, Script};
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;
use tracing::{debug, info, instrument, trace};

const CREDENTIALS_SET_KEY: &str = "credentials";
const BACKUPS_INDEX_KEY: &str = "backups";
const BACKUPS_USED_KEY: &str = "backups:used";
const BACKUPS_AVAILABLE_PREFIX: &str = "backups:available:";
const BINDING_TARGETS_KEY: &str = "binding_targets";
const BACKUPS_SEQ_KEY: &str = "backups:seq";

// Every script that mutates a record also returns it (or an empty reply when
// the record does not exist), so callers never read-then-write.

static CREATE_CREDENTIAL: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
redis.call('HSET', KEYS[1], 'id', ARGV[1], 'secret', ARGV[2], 'provider', ARGV[3],
    'status', 'healthy', 'tokens_used', 0, 'requests_count', 0, 'created_at', ARGV[4])
redis.call('SADD', KEYS[2], ARGV[1])
return 1
",
    )
});

static UPDATE_STATUS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 0 then return {} end
redis.call('HSET', KEYS[1], 'status', ARGV[1])
if ARGV[1] ~= 'healthy' then redis.call('HSET', KEYS[1], 'last_failure_at', ARGV[2]) end
return redis.call('HGETALL', KEYS[1])
",
    )
});

// HINCRBY refuses to overflow; the counter is pinned at ARGV[3] instead.
static INCREMENT_USAGE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 0 then return {} end
for i, name in ipairs({'tokens_used', 'requests_count'}) do
    local reply = redis.pcall('HINCRBY', KEYS[1], name, ARGV[i])
    if type(reply) == 'table' and reply.err then
        redis.call('HSET', KEYS[1], name, ARGV[3])
    end
end
return redis.call('HGETALL', KEYS[1])
",
    )
});

static RESET_CREDENTIAL: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 0 then return {} end
redis.call('HSET', KEYS[1], 'status', 'healthy', 'tokens_used', 0, 'requests_count', 0)
return redis.call('HGETALL', KEYS[1])
",
    )
});

static DELETE_CREDENTIAL: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local removed = redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[2], ARGV[1])
return removed
",
    )
});

static CREATE_BACKUP: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
local seq = redis.call('INCR', KEYS[4])
redis.call('HSET', KEYS[1], 'id', ARGV[1], 'secret', ARGV[2], 'provider', ARGV[3],
    'is_used', '0', 'created_at', ARGV[4], 'created_score', ARGV[5], 'seq', seq)
redis.call('ZADD', KEYS[2], ARGV[5], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[5], ARGV[1])
return 1
",
    )
});

// KEYS: available zset, used zset. ARGV: backup key prefix, activated_at,
// deletes_at, deletes_at score, target id.
// Backups created in the same millisecond share a score; the lowest `seq`
// (insertion order) goes first.
static DRAW_BACKUP: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
while true do
    local head = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
    if #head == 0 then return {} end
    local id, best = head[1], nil
    for _, candidate in ipairs(redis.call('ZRANGEBYSCORE', KEYS[1], head[2], head[2])) do
        local seq = tonumber(redis.call('HGET', ARGV[1] .. candidate, 'seq') or '0')
        if best == nil or seq < best then id, best = candidate, seq end
    end
    local key = ARGV[1] .. id
    redis.call('ZREM', KEYS[1], id)
    if redis.call('HGET', key, 'is_used') == '0' then
        redis.call('HSET', key, 'is_used', '1', 'activated_at', ARGV[2],
            'deletes_at', ARGV[3], 'used_for', ARGV[5])
        redis.call('ZADD', KEYS[2], ARGV[4], id)
        return redis.call('HGETALL', key)
    end
end
",
    )
});

// Returns -1 when missing, 0 when already available, 1 when restored.
static RESTORE_BACKUP: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
if redis.call('HGET', KEYS[1], 'is_used') ~= '1' then return 0 end
redis.call('HSET', KEYS[1], 'is_used', '0')
redis.call('HDEL', KEYS[1], 'activated_at', 'deletes_at', 'used_for')
redis.call('ZREM', KEYS[2], ARGV[1])
local provider = redis.call('HGET', KEYS[1], 'provider')
local score = redis.call('HGET', KEYS[1], 'created_score')
redis.call('ZADD', ARGV[2] .. provider, score, ARGV[1])
return 1
",
    )
});

static DELETE_BACKUP: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
local provider = redis.call('HGET', KEYS[1], 'provider')
redis.call('ZREM', ARGV[2] .. provider, ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('DEL', KEYS[1])
return 1
",
    )
});

// Deletes only rows that are still used when the script runs, so a restore
// that landed first wins.
static REAP_BACKUPS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local removed = {}
for _, id in ipairs(ids) do
    local key = ARGV[2] .. id
    redis.call('ZREM', KEYS[1], id)
    if redis.call('HGET', key, 'is_used') == '1' then
        redis.call('DEL', key)
        redis.call('ZREM', KEYS[2], id)
        table.insert(removed, id)
    end
end
return removed
",
    )
});

static CREATE_BINDING: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then return 0 end
redis.call('SADD', KEYS[2], ARGV[3])
return 1
",
    )
});

static SET_BINDING_ACTIVE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then return false end
local binding = cjson.decode(raw)
binding['is_active'] = (ARGV[2] == '1')
local encoded = cjson.encode(binding)
redis.call('HSET', KEYS[1], ARGV[1], encoded)
return encoded
",
    )
});

static DELETE_BINDING: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local removed = redis.call('HDEL', KEYS[1], ARGV[1])
if redis.call('HLEN', KEYS[1]) == 0 then redis.call('SREM', KEYS[2], ARGV[2]) end
return removed
",
    )
});

/// Redis implementation of the pool collections
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
}

impl RedisStore {
    pub async fn new(pool: Pool, key_prefix: impl Into<String>) -> Result<Self> {
        let key_prefix = key_prefix.into();
        let mut conn = pool.get().await?;
        let credential_count: usize = conn
            .scard(format!("{key_prefix}{CREDENTIALS_SET_KEY}"))
            .await?;
        let backup_count: usize = conn
            .zcard(format!("{key_prefix}{BACKUPS_INDEX_KEY}"))
            .await?;
        info!(
            redis.prefix = %key_prefix,
            credentials = credential_count,
            backups = backup_count,
            "Connected to Redis pool store"
        );
        Ok(Self { pool, key_prefix })
    }

    fn prefix_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn credential_key(&self, id: &str) -> String {
        self.prefix_key(&format!("credential:{id}"))
    }

    fn backup_key_prefix(&self) -> String {
        self.prefix_key("backup:")
    }

    fn backup_key(&self, id: &str) -> String {
        format!("{}{id}", self.backup_key_prefix())
    }

    fn available_key(&self, provider: &Provider) -> String {
        self.prefix_key(&format!("{BACKUPS_AVAILABLE_PREFIX}{provider}"))
    }

    fn bindings_key(&self, target_id: &str) -> String {
        self.prefix_key(&format!("bindings:{target_id}"))
    }

    async fn get_connection(&self) -> Result<RedisConnection> {
        self.pool.get().await.map_err(Into::into)
    }

    /// Loads rows in first-in-first-used order: `created_at`, then `seq`.
    async fn load_backup_rows(&self, ids: Vec<String>) -> Result<Vec<BackupCredential>> {
        let mut conn = self.get_connection().await?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let key = self.backup_key(&id);
            let row: HashMap<String, String> = conn.hgetall(&key).await?;
            // Reaped between the index read and now.
            if row.is_empty() {
                continue;
            }
            let seq = row.get("seq").and_then(|raw| raw.parse::<u64>().ok()).unwrap_or(0);
            rows.push((seq, parse_backup(&key, &row)?));
        }
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            a.created_at.cmp(&b.created_at).then(seq_a.cmp(seq_b))
        });
        Ok(rows.into_iter().map(|(_, backup)| backup).collect())
    }
}

fn field<'a>(key: &str, row: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    row.get(name)
        .map(String::as_str)
        .ok_or_else(|| AppError::corrupted(key, format!("missing field '{name}'")))
}

fn parse_number(key: &str, row: &HashMap<String, String>, name: &str) -> Result<u64> {
    field(key, row, name)?
        .parse()
        .map_err(|e| AppError::corrupted(key, format!("field '{name}': {e}")))
}

fn parse_time(key: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::corrupted(key, format!("timestamp '{raw}': {e}")))
}

fn parse_optional_time(
    key: &str,
    row: &HashMap<String, String>,
    name: &str,
) -> Result<Option<DateTime<Utc>>> {
    row.get(name).map(|raw| parse_time(key, raw)).transpose()
}

fn parse_credential(key: &str, row: &HashMap<String, String>) -> Result<Credential> {
    Ok(Credential {
        id: field(key, row, "id")?.to_string(),
        secret: Secret::new(field(key, row, "secret")?.to_string()),
        provider: field(key, row, "provider")?.parse()?,
        status: field(key, row, "status")?.parse()?,
        tokens_used: parse_number(key, row, "tokens_used")?,
        requests_count: parse_number(key, row, "requests_count")?,
        last_failure_at: parse_optional_time(key, row, "last_failure_at")?,
        created_at: parse_time(key, field(key, row, "created_at")?)?,
    })
}

fn parse_backup(key: &str, row: &HashMap<String, String>) -> Result<BackupCredential> {
    Ok(BackupCredential {
        id: field(key, row, "id")?.to_string(),
        secret: Secret::new(field(key, row, "secret")?.to_string()),
        provider: field(key, row, "provider")?.parse()?,
        is_used: field(key, row, "is_used")? == "1",
        activated_at: parse_optional_time(key, row, "activated_at")?,
        deletes_at: parse_optional_time(key, row, "deletes_at")?,
        used_for: row.get("used_for").cloned(),
        created_at: parse_time(key, field(key, row, "created_at")?)?,
    })
}

fn parse_binding(key: &str, raw: &str) -> Result<Binding> {
    serde_json::from_str(raw).map_err(|e| AppError::corrupted(key, e.to_string()))
}

#[async_trait]
impl CredentialStore for RedisStore {
    #[instrument(level = "trace", skip(self))]
    async fn get_credential(&self, id: &str) -> Result<Credential> {
        let mut conn = self.get_connection().await?;
        let key = self.credential_key(id);
        let row: HashMap<String, String> = conn.hgetall(&key).await?;
        if row.is_empty() {
            return Err(AppError::not_found(Entity::Credential, id));
        }
        parse_credential(&key, &row)
    }

    async fn list_credentials(&self, provider: Option<&Provider>) -> Result<Vec<Credential>> {
        let mut conn = self.get_connection().await?;
        let mut ids: Vec<String> = conn.smembers(self.prefix_key(CREDENTIALS_SET_KEY)).await?;
        ids.sort();
        trace!("RedisStore::list_credentials: found {} ids", ids.len());

        let mut credentials = Vec::with_capacity(ids.len());
        for id in ids {
            let key = self.credential_key(&id);
            let row: HashMap<String, String> = conn.hgetall(&key).await?;
            if row.is_empty() {
                continue;
            }
            let credential = parse_credential(&key, &row)?;
            if provider.map_or(true, |p| &credential.provider == p) {
                credentials.push(credential);
            }
        }
        Ok(credentials)
    }

    #[instrument(level = "debug", skip(self, credential), fields(credential_id = %credential.id))]
    async fn create_credential(&self, credential: Credential) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let created: i64 = CREATE_CREDENTIAL
            .key(self.credential_key(&credential.id))
            .key(self.prefix_key(CREDENTIALS_SET_KEY))
            .arg(&credential.id)
            .arg(credential.secret.expose_secret())
            .arg(credential.provider.as_str())
            .arg(credential.created_at.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        if created == 0 {
            return Err(AppError::DuplicateId { id: credential.id });
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self, now))]
    async fn update_status(
        &self,
        id: &str,
        status: CredentialStatus,
        now: DateTime<Utc>,
    ) -> Result<Credential> {
        let mut conn = self.get_connection().await?;
        let key = self.credential_key(id);
        let row: HashMap<String, String> = UPDATE_STATUS
            .key(&key)
            .arg(status.as_str())
            .arg(now.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        if row.is_empty() {
            return Err(AppError::not_found(Entity::Credential, id));
        }
        parse_credential(&key, &row)
    }

    async fn increment_usage(&self, id: &str, tokens: u64, requests: u64) -> Result<Credential> {
        let mut conn = self.get_connection().await?;
        let key = self.credential_key(id);
        let row: HashMap<String, String> = INCREMENT_USAGE
            .key(&key)
            .arg(tokens.min(Credential::MAX_COUNTER))
            .arg(requests.min(Credential::MAX_COUNTER))
            .arg(Credential::MAX_COUNTER)
            .invoke_async(&mut conn)
            .await?;
        if row.is_empty() {
            return Err(AppError::not_found(Entity::Credential, id));
        }
        parse_credential(&key, &row)
    }

    async fn reset_credential(&self, id: &str) -> Result<Credential> {
        let mut conn = self.get_connection().await?;
        let key = self.credential_key(id);
        let row: HashMap<String, String> = RESET_CREDENTIAL
            .key(&key)
            .invoke_async(&mut conn)
            .await?;
        if row.is_empty() {
            return Err(AppError::not_found(Entity::Credential, id));
        }
        parse_credential(&key, &row)
    }

    async fn delete_credential(&self, id: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = DELETE_CREDENTIAL
            .key(self.credential_key(id))
            .key(self.prefix_key(CREDENTIALS_SET_KEY))
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        if removed == 0 {
            return Err(AppError::not_found(Entity::Credential, id));
        }
        Ok(())
    }
}

#[async_trait]
impl BackupStore for RedisStore {
    async fn get_backup(&self, id: &str) -> Result<BackupCredential> {
        let mut conn = self.get_connection().await?;
        let key = self.backup_key(id);
        let row: HashMap<String, String> = conn.hgetall(&key).await?;
        if row.is_empty() {
            return Err(AppError::not_found(Entity::Backup, id));
        }
        parse_backup(&key, &row)
    }

    async fn list_backups(
        &self,
        provider: Option<&Provider>,
        filter: BackupFilter,
    ) -> Result<Vec<BackupCredential>> {
        let ids: Vec<String> = {
            let mut conn = self.get_connection().await?;
            conn.zrange(self.prefix_key(BACKUPS_INDEX_KEY), 0, -1).await?
        };
        let backups = self.load_backup_rows(ids).await?;
        Ok(backups
            .into_iter()
            .filter(|b| filter.matches(b))
            .filter(|b| provider.map_or(true, |p| &b.provider == p))
            .collect())
    }

    #[instrument(level = "debug", skip(self, backup), fields(backup_id = %backup.id))]
    async fn create_backup(&self, backup: BackupCredential) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let created: i64 = CREATE_BACKUP
            .key(self.backup_key(&backup.id))
            .key(self.prefix_key(BACKUPS_INDEX_KEY))
            .key(self.available_key(&backup.provider))
            .key(self.prefix_key(BACKUPS_SEQ_KEY))
            .arg(&backup.id)
            .arg(backup.secret.expose_secret())
            .arg(backup.provider.as_str())
            .arg(backup.created_at.to_rfc3339())
            .arg(backup.created_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        if created == 0 {
            return Err(AppError::DuplicateId { id: backup.id });
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self, now, retention))]
    async fn draw_backup(
        &self,
        provider: &Provider,
        target_id: &str,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<Option<BackupCredential>> {
        let mut conn = self.get_connection().await?;
        let deletes_at = now + retention;
        let row: HashMap<String, String> = DRAW_BACKUP
            .key(self.available_key(provider))
            .key(self.prefix_key(BACKUPS_USED_KEY))
            .arg(self.backup_key_prefix())
            .arg(now.to_rfc3339())
            .arg(deletes_at.to_rfc3339())
            .arg(deletes_at.timestamp_millis())
            .arg(target_id)
            .invoke_async(&mut conn)
            .await?;
        if row.is_empty() {
            debug!(%provider, "Backup reserve exhausted in Redis");
            return Ok(None);
        }
        let key = row
            .get("id")
            .map(|id| self.backup_key(id))
            .unwrap_or_else(|| self.backup_key_prefix());
        parse_backup(&key, &row).map(Some)
    }

    async fn restore_backup(&self, id: &str) -> Result<BackupCredential> {
        let mut conn = self.get_connection().await?;
        let outcome: i64 = RESTORE_BACKUP
            .key(self.backup_key(id))
            .key(self.prefix_key(BACKUPS_USED_KEY))
            .arg(id)
            .arg(self.prefix_key(BACKUPS_AVAILABLE_PREFIX))
            .invoke_async(&mut conn)
            .await?;
        match outcome {
            -1 => Err(AppError::not_found(Entity::Backup, id)),
            0 => Err(AppError::AlreadyAvailable { id: id.to_string() }),
            _ => self.get_backup(id).await,
        }
    }

    async fn delete_backup(&self, id: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = DELETE_BACKUP
            .key(self.backup_key(id))
            .key(self.prefix_key(BACKUPS_INDEX_KEY))
            .key(self.prefix_key(BACKUPS_USED_KEY))
            .arg(id)
            .arg(self.prefix_key(BACKUPS_AVAILABLE_PREFIX))
            .invoke_async(&mut conn)
            .await?;
        if removed == 0 {
            return Err(AppError::not_found(Entity::Backup, id));
        }
        Ok(())
    }

    async fn reap_backups(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let removed: Vec<String> = REAP_BACKUPS
            .key(self.prefix_key(BACKUPS_USED_KEY))
            .key(self.prefix_key(BACKUPS_INDEX_KEY))
            .arg(now.timestamp_millis())
            .arg(self.backup_key_prefix())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }
}

#[async_trait]
impl BindingStore for RedisStore {
    async fn create_binding(&self, binding: Binding) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let encoded = serde_json::to_string(&binding)?;
        let created: i64 = CREATE_BINDING
            .key(self.bindings_key(&binding.target_id))
            .key(self.prefix_key(BINDING_TARGETS_KEY))
            .arg(&binding.credential_id)
            .arg(encoded)
            .arg(&binding.target_id)
            .invoke_async(&mut conn)
            .await?;
        if created == 0 {
            return Err(AppError::DuplicateBinding {
                target_id: binding.target_id,
                credential_id: binding.credential_id,
            });
        }
        Ok(())
    }

    async fn set_binding_active(
        &self,
        target_id: &str,
        credential_id: &str,
        is_active: bool,
    ) -> Result<Binding> {
        let mut conn = self.get_connection().await?;
        let key = self.bindings_key(target_id);
        let encoded: Option<String> = SET_BINDING_ACTIVE
            .key(&key)
            .arg(credential_id)
            .arg(if is_active { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        match encoded {
            Some(raw) => parse_binding(&key, &raw),
            None => Err(AppError::not_found(
                Entity::Binding,
                format!("{target_id}/{credential_id}"),
            )),
        }
    }

    async fn delete_binding(&self, target_id: &str, credential_id: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = DELETE_BINDING
            .key(self.bindings_key(target_id))
            .key(self.prefix_key(BINDING_TARGETS_KEY))
            .arg(credential_id)
            .arg(target_id)
            .invoke_async(&mut conn)
            .await?;
        if removed == 0 {
            return Err(AppError::not_found(
                Entity::Binding,
                format!("{target_id}/{credential_id}"),
            ));
        }
        Ok(())
    }

    async fn list_bindings_for_target(&self, target_id: &str) -> Result<Vec<Binding>> {
        let mut conn = self.get_connection().await?;
        let key = self.bindings_key(target_id);
        let rows: HashMap<String, String> = conn.hgetall(&key).await?;
        let mut bindings = rows
            .values()
            .map(|raw| parse_binding(&key, raw))
            .collect::<Result<Vec<_>>>()?;
        bindings.sort_by(|a, b| a.credential_id.cmp(&b.credential_id));
        Ok(bindings)
    }

    async fn list_all_bindings(&self) -> Result<Vec<Binding>> {
        let mut targets: Vec<String> = {
            let mut conn = self.get_connection().await?;
            conn.smembers(self.prefix_key(BINDING_TARGETS_KEY)).await?
        };
        targets.sort();
        let mut all = Vec::new();
        for target in targets {
            all.extend(self.list_bindings_for_target(&target).await?);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_credential_row() {
        let row = row(&[
            ("id", "k1"),
            ("secret", "sk-0123456789"),
            ("provider", "ohmygpt"),
            ("status", "banned"),
            ("tokens_used", "42"),
            ("requests_count", "3"),
            ("last_failure_at", "2024-05-01T10:00:00+00:00"),
            ("created_at", "2024-04-01T10:00:00+00:00"),
        ]);
        let credential = parse_credential("p:credential:k1", &row).unwrap();
        assert_eq!(credential.id, "k1");
        assert_eq!(credential.provider, Provider::OhMyGpt);
        assert_eq!(credential.status, CredentialStatus::Banned);
        assert_eq!(credential.tokens_used, 42);
        assert!(credential.last_failure_at.is_some());
    }

    #[test]
    fn test_parse_credential_missing_field_is_corruption() {
        let row = row(&[("id", "k1"), ("secret", "sk-0123456789")]);
        assert!(matches!(
            parse_credential("p:credential:k1", &row),
            Err(AppError::StorageCorruption { .. })
        ));
    }

    #[test]
    fn test_parse_available_backup_row() {
        let row = row(&[
            ("id", "b1"),
            ("secret", "backup-secret-1"),
            ("provider", "openhands"),
            ("is_used", "0"),
            ("created_at", "2024-04-01T10:00:00+00:00"),
            ("created_score", "1711965600000"),
        ]);
        let backup = parse_backup("p:backup:b1", &row).unwrap();
        assert!(backup.is_available());
        assert!(backup.activated_at.is_none());
        assert!(backup.used_for.is_none());
    }

    async fn live_store() -> Option<RedisStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        let pool = deadpool_redis::Config::from_url(url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .ok()?;
        let prefix = format!("key_relay_test:{}:", uuid::Uuid::new_v4().simple());
        RedisStore::new(pool, prefix).await.ok()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires REDIS_URL"]
    async fn test_redis_draw_is_exclusive() {
        let Some(store) = live_store().await else {
            return;
        };
        let store = std::sync::Arc::new(store);
        let now = Utc::now();
        for i in 0..5 {
            store
                .create_backup(BackupCredential::new(
                    format!("b{i}"),
                    format!("backup-secret-{i}"),
                    Provider::OhMyGpt,
                    now + Duration::milliseconds(i),
                ))
                .await
                .unwrap();
        }

        let draws = (0..20).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .draw_backup(&Provider::OhMyGpt, "t", Utc::now(), Duration::hours(1))
                    .await
                    .unwrap()
            })
        });
        let results = futures::future::join_all(draws).await;
        let mut drawn: Vec<String> = results
            .into_iter()
            .filter_map(|joined| joined.unwrap())
            .map(|b| b.id)
            .collect();
        drawn.sort();
        drawn.dedup();
        assert_eq!(drawn.len(), 5);
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_redis_restore_beats_reap() {
        let Some(store) = live_store().await else {
            return;
        };
        let now = Utc::now();
        store
            .create_backup(BackupCredential::new(
                "b1".into(),
                "backup-secret-1".into(),
                Provider::OpenHands,
                now,
            ))
            .await
            .unwrap();
        store
            .draw_backup(&Provider::OpenHands, "t", now, Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();

        store.restore_backup("b1").await.unwrap();
        let reaped = store.reap_backups(now + Duration::hours(1)).await.unwrap();
        assert!(reaped.is_empty());
        assert!(store.get_backup("b1").await.unwrap().is_available());
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_redis_same_millisecond_backups_keep_insertion_order() {
        let Some(store) = live_store().await else {
            return;
        };
        let now = Utc::now();
        for id in ["zz", "mm", "aa"] {
            store
                .create_backup(BackupCredential::new(
                    id.into(),
                    format!("backup-secret-{id}"),
                    Provider::OhMyGpt,
                    now,
                ))
                .await
                .unwrap();
        }

        let listed: Vec<String> = store
            .list_backups(None, BackupFilter::All)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(listed, vec!["zz", "mm", "aa"]);

        let first = store
            .draw_backup(&Provider::OhMyGpt, "t", now, Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, "zz");
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_redis_usage_counters_saturate() {
        let Some(store) = live_store().await else {
            return;
        };
        store
            .create_credential(Credential::new(
                "k1".into(),
                "secret-value-1".into(),
                Provider::OhMyGpt,
                Utc::now(),
            ))
            .await
            .unwrap();

        store
            .increment_usage("k1", Credential::MAX_COUNTER - 10, 1)
            .await
            .unwrap();
        let credential = store.increment_usage("k1", u64::MAX, 5).await.unwrap();

        assert_eq!(credential.tokens_used, Credential::MAX_COUNTER);
        assert_eq!(credential.requests_count, 6);
    }
}

//! `SessionStore` backed by Redis: a `deadpool-redis` pool plus Lua
//! `EVAL` scripts for every operation that must be atomic — the
//! upsert-and-TTL-raise protocol, pruning, and delete-and-recompute.
//! Redis has scripting, so Charon uses it directly rather than a
//! compare-and-swap retry loop.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::Script;
use std::sync::Arc;

use crate::error::StoreError;
use crate::session::Session;
use crate::session::SessionType;
use crate::store::{
    PRUNE_COOLDOWN_SECS, SessionStore, expiration_set_key, lock_map_key, open_sealed,
    prune_lock_key, seal, session_map_key,
};
use crate::token::KeyProvider;

fn io_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::Io(err.to_string())
}

/// Result of an opportunistic prune, surfaced for observability/tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOutcome {
    Pruned(u32),
    Skipped,
}

/// `KEYS = [session_map, expiration_set, lock_map, prune_lock]`,
/// `ARGV = [now, prune_cooldown_secs]`. Gated by the cooldown key so a
/// busy `(user_id, type)` pair isn't pruned on every upsert; sweeps and
/// removes everything already past its expiration score.
const PRUNE_SCRIPT: &str = r#"
local last = redis.call('GET', KEYS[4])
if last and (tonumber(ARGV[1]) - tonumber(last)) < tonumber(ARGV[2]) then
    return -1
end
redis.call('SET', KEYS[4], ARGV[1])
redis.call('EXPIRE', KEYS[4], ARGV[2])

local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
if #expired > 0 then
    redis.call('ZREM', KEYS[2], unpack(expired))
    for i, sid in ipairs(expired) do
        redis.call('HDEL', KEYS[1], sid)
        redis.call('HDEL', KEYS[3], sid)
    end
end
return #expired
"#;

/// `KEYS = [session_map, expiration_set, lock_map]`,
/// `ARGV = [session_id, sealed_blob, lock_version, expected_prev_lock_version,
/// refresh_expires_at, now]`. Rejects with `'CONFLICT'` when the stored
/// lock version isn't the caller's expected predecessor, no-ops when the
/// session is already expired, then writes all three collections and
/// raises (never lowers) their shared TTL to the new maximum expiration
/// score across the `(user_id, type)` namespace.
const UPSERT_SCRIPT: &str = r#"
local cur = redis.call('HGET', KEYS[3], ARGV[1])
if cur and cur ~= ARGV[4] then
    return 'CONFLICT'
end
if tonumber(ARGV[5]) < tonumber(ARGV[6]) then
    return 'OK'
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[5], ARGV[1])
redis.call('HSET', KEYS[3], ARGV[1], ARGV[3])

local top = redis.call('ZREVRANGE', KEYS[2], 0, 0, 'WITHSCORES')
if top[2] then
    local ttl = tonumber(top[2]) - tonumber(ARGV[6])
    if ttl > 0 then
        local curttl = redis.call('TTL', KEYS[1])
        if curttl < 0 or ttl > curttl then
            redis.call('EXPIRE', KEYS[1], ttl)
            redis.call('EXPIRE', KEYS[2], ttl)
            redis.call('EXPIRE', KEYS[3], ttl)
        end
    end
end
return 'OK'
"#;

/// `KEYS = [session_map, expiration_set, lock_map]`,
/// `ARGV = [session_id, now]`. Removes one session from all three
/// collections, then either shrinks the shared TTL to the remaining
/// maximum expiration score or drops the collections outright if none
/// remain.
const DELETE_SCRIPT: &str = r#"
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])

local top = redis.call('ZREVRANGE', KEYS[2], 0, 0, 'WITHSCORES')
if top[2] then
    local ttl = tonumber(top[2]) - tonumber(ARGV[2])
    if ttl > 0 then
        redis.call('EXPIRE', KEYS[1], ttl)
        redis.call('EXPIRE', KEYS[2], ttl)
        redis.call('EXPIRE', KEYS[3], ttl)
    end
else
    redis.call('DEL', KEYS[1])
    redis.call('DEL', KEYS[2])
    redis.call('DEL', KEYS[3])
end
return 'OK'
"#;

/// `SessionStore` implementation backed by Redis.
pub struct RedisSessionStore<K: KeyProvider> {
    pool: deadpool_redis::Pool,
    prefix: String,
    seal_keys: Arc<K>,
}

impl<K: KeyProvider> RedisSessionStore<K> {
    pub fn new(pool: deadpool_redis::Pool, prefix: impl Into<String>, seal_keys: Arc<K>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            seal_keys,
        }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool.get().await.map_err(io_err)
    }

    /// Best-effort prune of `(user_id, type)`'s expired sessions, guarded
    /// by the 1-hour prune lock. Never returns an error to the caller
    /// of `upsert` — failures are logged and swallowed, since this is a
    /// best-effort secondary operation.
    pub async fn prune(
        &self,
        user_id: &str,
        session_type: &SessionType,
    ) -> Result<PruneOutcome, StoreError> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp();

        let script = Script::new(PRUNE_SCRIPT);

        let result: i64 = script
            .key(session_map_key(&self.prefix, user_id, session_type))
            .key(expiration_set_key(&self.prefix, user_id, session_type))
            .key(lock_map_key(&self.prefix, user_id, session_type))
            .key(prune_lock_key(&self.prefix, user_id, session_type))
            .arg(now)
            .arg(PRUNE_COOLDOWN_SECS)
            .invoke_async(&mut conn)
            .await
            .map_err(io_err)?;

        if result < 0 {
            Ok(PruneOutcome::Skipped)
        } else {
            Ok(PruneOutcome::Pruned(result as u32))
        }
    }
}

#[async_trait]
impl<K: KeyProvider> SessionStore for RedisSessionStore<K> {
    async fn get(
        &self,
        session_id: &str,
        user_id: &str,
        session_type: &SessionType,
    ) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn().await?;
        let key = session_map_key(&self.prefix, user_id, session_type);
        let sealed: Option<Vec<u8>> = conn.hget(&key, session_id).await.map_err(io_err)?;
        let Some(sealed) = sealed else {
            return Ok(None);
        };

        let seal_key = self
            .seal_keys
            .current_signing_key()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let Some(plaintext) = open_sealed(&sealed, &seal_key) else {
            eprintln!(
                "[charon] at-rest integrity check failed for session {session_id} (user {user_id})"
            );
            return Ok(None);
        };

        let session: Session = serde_json::from_slice(&plaintext).map_err(io_err)?;
        let now = Utc::now().timestamp();
        if session.user_id != user_id || session.session_type != *session_type || session.is_expired(now) {
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn upsert(&self, session: &Session) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp();

        let seal_key = self
            .seal_keys
            .current_signing_key()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let plaintext = serde_json::to_vec(session).map_err(io_err)?;
        let blob = seal(&plaintext, &seal_key);

        let expected_prev = session.lock_version.saturating_sub(1).to_string();

        let script = Script::new(UPSERT_SCRIPT);

        let result: String = script
            .key(session_map_key(&self.prefix, &session.user_id, &session.session_type))
            .key(expiration_set_key(&self.prefix, &session.user_id, &session.session_type))
            .key(lock_map_key(&self.prefix, &session.user_id, &session.session_type))
            .arg(&session.id)
            .arg(blob)
            .arg(session.lock_version.to_string())
            .arg(expected_prev)
            .arg(session.refresh_expires_at)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(io_err)?;

        if result == "CONFLICT" {
            return Err(StoreError::Conflict);
        }

        if let Err(err) = self.prune(&session.user_id, &session.session_type).await {
            eprintln!("[charon] opportunistic prune failed: {err}");
        }

        Ok(())
    }

    async fn delete(
        &self,
        session_id: &str,
        user_id: &str,
        session_type: &SessionType,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp();

        let script = Script::new(DELETE_SCRIPT);

        let _: String = script
            .key(session_map_key(&self.prefix, user_id, session_type))
            .key(expiration_set_key(&self.prefix, user_id, session_type))
            .key(lock_map_key(&self.prefix, user_id, session_type))
            .arg(session_id)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(io_err)?;

        Ok(())
    }

    async fn get_all(
        &self,
        user_id: &str,
        session_type: &SessionType,
    ) -> Result<Vec<Session>, StoreError> {
        let mut conn = self.conn().await?;
        let key = session_map_key(&self.prefix, user_id, session_type);
        let all: Vec<(String, Vec<u8>)> = conn.hgetall(&key).await.map_err(io_err)?;

        let seal_key = self
            .seal_keys
            .current_signing_key()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let now = Utc::now().timestamp();

        let mut sessions = Vec::with_capacity(all.len());
        for (session_id, sealed) in all {
            let Some(plaintext) = open_sealed(&sealed, &seal_key) else {
                eprintln!("[charon] at-rest integrity check failed for session {session_id}");
                continue;
            };
            match serde_json::from_slice::<Session>(&plaintext) {
                Ok(session)
                    if session.user_id == user_id
                        && session.session_type == *session_type
                        && !session.is_expired(now) =>
                {
                    sessions.push(session);
                }
                Ok(_) => {}
                Err(err) => eprintln!("[charon] failed to deserialize session {session_id}: {err}"),
            }
        }
        Ok(sessions)
    }

    async fn delete_all(&self, user_id: &str, session_type: &SessionType) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let keys = [
            session_map_key(&self.prefix, user_id, session_type),
            expiration_set_key(&self.prefix, user_id, session_type),
            lock_map_key(&self.prefix, user_id, session_type),
            prune_lock_key(&self.prefix, user_id, session_type),
        ];
        let _: () = conn.del(&keys[..]).await.map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_namespaced_by_prefix() {
        let t = SessionType::Full;
        assert_eq!(session_map_key("charon", "1", &t), "charon.s.1.full");
        assert_eq!(prune_lock_key("charon", "1", &t), "charon.pl.1.full");
    }

    // No live Redis connection is exercised here; these assert the
    // documented protocol steps against the literal Lua source each
    // `Script` is built from, in the order they must run.

    #[test]
    fn upsert_script_rejects_conflicting_lock_version_before_writing_anything() {
        let conflict_check = UPSERT_SCRIPT.find("return 'CONFLICT'").unwrap();
        let first_write = UPSERT_SCRIPT.find("HSET', KEYS[1]").unwrap();
        assert!(conflict_check < first_write);
        assert!(UPSERT_SCRIPT.contains("cur ~= ARGV[4]"));
    }

    #[test]
    fn upsert_script_noops_on_an_already_expired_session_before_writing() {
        let expiry_noop = UPSERT_SCRIPT
            .find("tonumber(ARGV[5]) < tonumber(ARGV[6])")
            .unwrap();
        let first_write = UPSERT_SCRIPT.find("HSET', KEYS[1]").unwrap();
        assert!(expiry_noop < first_write);
    }

    #[test]
    fn upsert_script_writes_all_three_collections() {
        assert!(UPSERT_SCRIPT.contains("HSET', KEYS[1]"));
        assert!(UPSERT_SCRIPT.contains("ZADD', KEYS[2]"));
        assert!(UPSERT_SCRIPT.contains("HSET', KEYS[3]"));
    }

    #[test]
    fn upsert_script_raises_but_never_lowers_the_shared_ttl() {
        assert!(UPSERT_SCRIPT.contains("curttl < 0 or ttl > curttl"));
        let ttl_guard = UPSERT_SCRIPT.find("local ttl = tonumber(top[2])").unwrap();
        let raise = UPSERT_SCRIPT.find("curttl < 0 or ttl > curttl").unwrap();
        assert!(ttl_guard < raise);
    }

    #[test]
    fn prune_script_is_gated_by_cooldown_before_scanning_for_expired() {
        let cooldown_skip = PRUNE_SCRIPT.find("return -1").unwrap();
        let scan = PRUNE_SCRIPT.find("ZRANGEBYSCORE").unwrap();
        assert!(cooldown_skip < scan);
        assert!(PRUNE_SCRIPT.contains("tonumber(ARGV[1]) - tonumber(last)) < tonumber(ARGV[2])"));
    }

    #[test]
    fn prune_script_removes_expired_from_every_collection() {
        assert!(PRUNE_SCRIPT.contains("ZREM', KEYS[2]"));
        assert!(PRUNE_SCRIPT.contains("HDEL', KEYS[1]"));
        assert!(PRUNE_SCRIPT.contains("HDEL', KEYS[3]"));
    }

    #[test]
    fn delete_script_recomputes_ttl_from_the_remaining_maximum_or_drops_collections() {
        let remove = DELETE_SCRIPT.find("HDEL', KEYS[1]").unwrap();
        let recompute = DELETE_SCRIPT.find("ZREVRANGE").unwrap();
        assert!(remove < recompute);
        assert!(DELETE_SCRIPT.contains("EXPIRE', KEYS[1], ttl"));
        assert!(DELETE_SCRIPT.contains("DEL', KEYS[1]"));
    }
}

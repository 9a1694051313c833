//! Redis coordination store.
//!
//! # Responsibilities
//! - Hold a multiplexed, auto-reconnecting connection
//! - Run each ledger operation as one Lua script (`EVALSHA`, loaded on demand)
//! - Bound every command with the configured timeout
//!
//! # Design Decisions
//! - Scripts read `now` from `TIME` so instances with skewed clocks agree
//! - Sweeps are bounded: wait-queue cleanup visits at most `cleanup_limit` users
//! - Jitter arrives as script arguments; the script itself draws nothing

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::{Client, Script};
use tokio::time::timeout;

use crate::config::StoreConfig;
use crate::store::{
    CoordinationStore, SelectedSlot, SlotSelection, StoreError, StoreResult, WaitQueueKeys,
};

// KEYS[1] = slot set
// ARGV[1] = max concurrency, ARGV[2] = ttl seconds, ARGV[3] = holder
const ACQUIRE_SLOT: &str = r#"
local key = KEYS[1]
local maxConcurrency = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])
local holder = ARGV[3]

local now = tonumber(redis.call('TIME')[1])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - ttl)

if redis.call('ZSCORE', key, holder) ~= false then
    redis.call('ZADD', key, now, holder)
    redis.call('EXPIRE', key, ttl)
    return 1
end

if redis.call('ZCARD', key) < maxConcurrency then
    redis.call('ZADD', key, now, holder)
    redis.call('EXPIRE', key, ttl)
    return 1
end

return 0
"#;

// KEYS[1] = slot set
// ARGV[1] = ttl seconds
const SLOT_COUNT: &str = r#"
local key = KEYS[1]
local ttl = tonumber(ARGV[1])

local now = tonumber(redis.call('TIME')[1])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - ttl)
return redis.call('ZCARD', key)
"#;

// KEYS[i]  = slot set of candidate i
// ARGV[1]  = ttl seconds, ARGV[2] = holder
// ARGV[3..5] = priority / load / jitter weights
// ARGV[6 + 3(i-1) ..] = priority, max concurrency, jitter of candidate i
// Returns {index (1-based, 0 = none), concurrency}.
const SELECT_SLOT: &str = r#"
local ttl = tonumber(ARGV[1])
local holder = ARGV[2]
local wPriority = tonumber(ARGV[3])
local wLoad = tonumber(ARGV[4])
local wJitter = tonumber(ARGV[5])

local now = tonumber(redis.call('TIME')[1])
local ranked = {}

for i, key in ipairs(KEYS) do
    local base = 5 + (i - 1) * 3
    local priority = tonumber(ARGV[base + 1])
    local maxConcurrency = tonumber(ARGV[base + 2])
    local jitter = tonumber(ARGV[base + 3])

    redis.call('ZREMRANGEBYSCORE', key, '-inf', now - ttl)
    local live = redis.call('ZCARD', key)
    local load = 1
    if maxConcurrency > 0 then
        load = live / maxConcurrency
    end

    ranked[#ranked + 1] = {
        index = i,
        key = key,
        live = live,
        max = maxConcurrency,
        score = priority * wPriority + load * wLoad + jitter * wJitter,
    }
end

for _, c in ipairs(ranked) do
    if redis.call('ZSCORE', c.key, holder) ~= false then
        redis.call('ZADD', c.key, now, holder)
        redis.call('EXPIRE', c.key, ttl)
        return {c.index, c.live}
    end
end

table.sort(ranked, function(a, b)
    if a.score == b.score then
        return a.index < b.index
    end
    return a.score < b.score
end)

for _, c in ipairs(ranked) do
    if c.live < c.max then
        redis.call('ZADD', c.key, now, holder)
        redis.call('EXPIRE', c.key, ttl)
        return {c.index, c.live + 1}
    end
end

return {0, 0}
"#;

// Shared prologue of the wait-queue scripts.
// KEYS[1] = total, KEYS[2] = updated zset, KEYS[3] = counts hash
const WAIT_PROLOGUE: &str = r#"
local totalKey = KEYS[1]
local updatedKey = KEYS[2]
local countsKey = KEYS[3]

local function ensureTotal()
    if redis.call('EXISTS', totalKey) == 0 then
        local sum = 0
        for _, v in ipairs(redis.call('HVALS', countsKey)) do
            sum = sum + tonumber(v)
        end
        redis.call('SET', totalKey, sum)
    end
end

local function sweepIdle(now, ttl, limit)
    if limit <= 0 then
        return
    end
    local idle = redis.call('ZRANGEBYSCORE', updatedKey, '-inf', now - ttl, 'LIMIT', 0, limit)
    for _, uid in ipairs(idle) do
        local c = tonumber(redis.call('HGET', countsKey, uid) or '0')
        if c > 0 then
            redis.call('DECRBY', totalKey, c)
        end
        redis.call('HDEL', countsKey, uid)
        redis.call('ZREM', updatedKey, uid)
    end
end

local function keepAlive(ttl)
    local keep = ttl * 2
    redis.call('EXPIRE', totalKey, keep)
    redis.call('EXPIRE', updatedKey, keep)
    redis.call('EXPIRE', countsKey, keep)
end

local now = tonumber(redis.call('TIME')[1])
"#;

// ARGV[1] = user, ARGV[2] = max wait, ARGV[3] = ttl, ARGV[4] = cleanup limit
const INCREMENT_WAIT: &str = r#"
local user = ARGV[1]
local maxWait = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])
local limit = tonumber(ARGV[4])

ensureTotal()
sweepIdle(now, ttl, limit)

local current = tonumber(redis.call('HGET', countsKey, user) or '0')
if current >= maxWait then
    return 0
end

redis.call('HSET', countsKey, user, current + 1)
redis.call('ZADD', updatedKey, now, user)
redis.call('INCR', totalKey)
keepAlive(ttl)
return 1
"#;

// ARGV[1] = user, ARGV[2] = ttl, ARGV[3] = cleanup limit
const DECREMENT_WAIT: &str = r#"
local user = ARGV[1]
local ttl = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

ensureTotal()
sweepIdle(now, ttl, limit)

local current = tonumber(redis.call('HGET', countsKey, user) or '0')
if current <= 0 then
    return 1
end

if current - 1 <= 0 then
    redis.call('HDEL', countsKey, user)
    redis.call('ZREM', updatedKey, user)
else
    redis.call('HSET', countsKey, user, current - 1)
    redis.call('ZADD', updatedKey, now, user)
end

if redis.call('DECR', totalKey) < 0 then
    redis.call('SET', totalKey, 0)
end
keepAlive(ttl)
return 1
"#;

// ARGV[1] = ttl, ARGV[2] = cleanup limit
const TOTAL_WAIT: &str = r#"
local ttl = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])

ensureTotal()
sweepIdle(now, ttl, limit)
keepAlive(ttl)

local total = tonumber(redis.call('GET', totalKey) or '0')
if total < 0 then
    total = 0
    redis.call('SET', totalKey, 0)
end
return total
"#;

struct Scripts {
    acquire_slot: Script,
    slot_count: Script,
    select_slot: Script,
    increment_wait: Script,
    decrement_wait: Script,
    total_wait: Script,
}

fn scripts() -> &'static Scripts {
    static SCRIPTS: OnceLock<Scripts> = OnceLock::new();
    SCRIPTS.get_or_init(|| Scripts {
        acquire_slot: Script::new(ACQUIRE_SLOT),
        slot_count: Script::new(SLOT_COUNT),
        select_slot: Script::new(SELECT_SLOT),
        increment_wait: Script::new(&format!("{WAIT_PROLOGUE}{INCREMENT_WAIT}")),
        decrement_wait: Script::new(&format!("{WAIT_PROLOGUE}{DECREMENT_WAIT}")),
        total_wait: Script::new(&format!("{WAIT_PROLOGUE}{TOTAL_WAIT}")),
    })
}

/// Coordination store backed by a Redis server shared by all instances.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Open a connection manager for `config.url`.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let command_timeout = config.command_timeout();
        let client = Client::open(config.url.as_str())?;
        let conn = timeout(command_timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Timeout(command_timeout))??;

        tracing::info!(
            url = %config.url,
            command_timeout_ms = command_timeout.as_millis() as u64,
            "Coordination store connected"
        );
        Ok(Self {
            conn,
            command_timeout,
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = ::redis::RedisResult<T>>,
    {
        match timeout(self.command_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.command_timeout)),
        }
    }
}

fn non_negative(value: i64, what: &str) -> StoreResult<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::UnexpectedReply(format!("negative {what}: {value}")))
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn acquire_slot(
        &self,
        key: &str,
        holder: &str,
        max_concurrency: u32,
        ttl_secs: u64,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = scripts().acquire_slot.key(key);
        invocation.arg(max_concurrency).arg(ttl_secs).arg(holder);
        let granted: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(granted == 1)
    }

    async fn release_slot(&self, key: &str, holder: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = ::redis::cmd("ZREM");
        cmd.arg(key).arg(holder);
        let _removed: i64 = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn slot_count(&self, key: &str, ttl_secs: u64) -> StoreResult<u32> {
        let mut conn = self.conn.clone();
        let mut invocation = scripts().slot_count.key(key);
        invocation.arg(ttl_secs);
        let count: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        let count = non_negative(count, "slot count")?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn clear_slots(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = ::redis::cmd("DEL");
        cmd.arg(key);
        let _deleted: i64 = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn select_slot(
        &self,
        selection: &SlotSelection<'_>,
    ) -> StoreResult<Option<SelectedSlot>> {
        let mut conn = self.conn.clone();
        let mut invocation = scripts().select_slot.prepare_invoke();
        for candidate in &selection.candidates {
            invocation.key(&candidate.key);
        }
        invocation
            .arg(selection.ttl_secs)
            .arg(selection.holder)
            .arg(selection.weights.priority)
            .arg(selection.weights.load)
            .arg(selection.weights.jitter);
        for candidate in &selection.candidates {
            invocation
                .arg(candidate.priority)
                .arg(candidate.max_concurrency)
                .arg(candidate.jitter);
        }

        let (index, concurrency): (i64, i64) =
            self.bounded(invocation.invoke_async(&mut conn)).await?;
        if index == 0 {
            return Ok(None);
        }
        let index = non_negative(index - 1, "candidate index")? as usize;
        if index >= selection.candidates.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "candidate index {} out of range",
                index + 1
            )));
        }
        let concurrency = non_negative(concurrency, "slot count")?;
        Ok(Some(SelectedSlot {
            index,
            concurrency: u32::try_from(concurrency).unwrap_or(u32::MAX),
        }))
    }

    async fn increment_wait(
        &self,
        keys: &WaitQueueKeys,
        user: &str,
        max_wait: u32,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = scripts().increment_wait.prepare_invoke();
        invocation
            .key(&keys.total)
            .key(&keys.updated)
            .key(&keys.counts)
            .arg(user)
            .arg(max_wait)
            .arg(ttl_secs)
            .arg(cleanup_limit);
        let admitted: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(admitted == 1)
    }

    async fn decrement_wait(
        &self,
        keys: &WaitQueueKeys,
        user: &str,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut invocation = scripts().decrement_wait.prepare_invoke();
        invocation
            .key(&keys.total)
            .key(&keys.updated)
            .key(&keys.counts)
            .arg(user)
            .arg(ttl_secs)
            .arg(cleanup_limit);
        let _: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(())
    }

    async fn total_wait(
        &self,
        keys: &WaitQueueKeys,
        ttl_secs: u64,
        cleanup_limit: u32,
    ) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let mut invocation = scripts().total_wait.prepare_invoke();
        invocation
            .key(&keys.total)
            .key(&keys.updated)
            .key(&keys.counts)
            .arg(ttl_secs)
            .arg(cleanup_limit);
        let total: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        non_negative(total, "wait depth")
    }
}

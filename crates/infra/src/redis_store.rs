use std::time::Duration;

use mpbridge_domain::ports::BoxFuture;
use mpbridge_domain::ports::cache::{CacheError, KvStore};
use redis::AsyncCommands;
use redis::Value;
use redis::aio::ConnectionManager;

const COMPARE_AND_DELETE: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

const COMPARE_AND_SWAP: &str = r#"
    if redis.call('GET', KEYS[1]) ~= ARGV[1] then
        return 0
    end
    local ttl_ms = tonumber(ARGV[3])
    if ttl_ms > 0 then
        redis.call('SET', KEYS[1], ARGV[2], 'PX', ttl_ms)
    else
        redis.call('SET', KEYS[1], ARGV[2])
    end
    return 1
"#;

/// `KvStore` shared by every worker process.
#[derive(Clone)]
pub struct RedisKvStore {
    manager: ConnectionManager,
    compare_and_delete: redis::Script,
    compare_and_swap: redis::Script,
}

impl RedisKvStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| CacheError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            compare_and_delete: redis::Script::new(COMPARE_AND_DELETE),
            compare_and_swap: redis::Script::new(COMPARE_AND_SWAP),
        })
    }

    /// Zero means "no expiry" and is sent as a plain SET.
    fn ttl_ms(ttl: Duration) -> u64 {
        ttl.as_millis() as u64
    }
}

fn store_error(err: redis::RedisError) -> CacheError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        CacheError::Unavailable(err.to_string())
    } else {
        CacheError::Store(err.to_string())
    }
}

impl KvStore for RedisKvStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            conn.get(key).await.map_err(store_error)
        })
    }

    fn get_many(&self, keys: &[String]) -> BoxFuture<'_, Result<Vec<Option<String>>, CacheError>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            let mut conn = self.manager.clone();
            redis::cmd("MGET")
                .arg(&keys)
                .query_async(&mut conn)
                .await
                .map_err(store_error)
        })
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, Result<(), CacheError>> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(value);
            let ttl_ms = Self::ttl_ms(ttl);
            if ttl_ms > 0 {
                cmd.arg("PX").arg(ttl_ms);
            }
            let _: Value = cmd.query_async(&mut conn).await.map_err(store_error)?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), CacheError>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: i64 = conn.del(key).await.map_err(store_error)?;
            Ok(())
        })
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(value).arg("NX");
            let ttl_ms = Self::ttl_ms(ttl);
            if ttl_ms > 0 {
                cmd.arg("PX").arg(ttl_ms);
            }
            let result: Option<String> = cmd.query_async(&mut conn).await.map_err(store_error)?;
            Ok(result.is_some())
        })
    }

    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = key.to_string();
        let expected = expected.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let deleted: i64 = self
                .compare_and_delete
                .key(&key)
                .arg(expected)
                .invoke_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(deleted == 1)
        })
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = key.to_string();
        let expected = expected.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let swapped: i64 = self
                .compare_and_swap
                .key(&key)
                .arg(expected)
                .arg(value)
                .arg(Self::ttl_ms(ttl))
                .invoke_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(swapped == 1)
        })
    }

    fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        let entries = entries.to_vec();
        Box::pin(async move {
            if entries.is_empty() {
                return Ok(());
            }
            let ttl_ms = Self::ttl_ms(ttl);
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            for (key, value) in &entries {
                let cmd = pipeline.cmd("SET").arg(key).arg(value);
                if ttl_ms > 0 {
                    cmd.arg("PX").arg(ttl_ms);
                }
            }
            let mut conn = self.manager.clone();
            let _: Vec<Value> = pipeline.query_async(&mut conn).await.map_err(store_error)?;
            Ok(())
        })
    }

    fn delete_many(&self, keys: &[String]) -> BoxFuture<'_, Result<(), CacheError>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(());
            }
            let mut conn = self.manager.clone();
            let _: i64 = redis::cmd("DEL")
                .arg(&keys)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(())
        })
    }
}

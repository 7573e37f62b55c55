//! Search service client: the narrow surface the remote store needs.

use mnemo_core::{AppError, AppResult};
use redis::Commands;

/// Outcome of an index creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexCreation {
    Created,
    AlreadyExists,
}

/// A write queued in a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    SetVector { key: String, vector: Vec<f32> },
    Delete { key: String },
}

/// Key-value store with a vector search extension.
pub trait SearchClient: Send + Sync {
    /// Create a FLOAT32 cosine vector index over JSON documents under `prefix`.
    fn create_index(&self, index_name: &str, prefix: &str, dimension: usize)
        -> AppResult<IndexCreation>;

    /// Drop the index definition; returns false if it did not exist.
    fn drop_index(&self, index_name: &str) -> AppResult<bool>;

    fn set_vector(&self, key: &str, vector: &[f32]) -> AppResult<()>;

    fn delete_key(&self, key: &str) -> AppResult<()>;

    /// Delete every key starting with `prefix`; returns how many were deleted.
    fn delete_by_prefix(&self, prefix: &str) -> AppResult<usize>;

    fn first_key_with_prefix(&self, prefix: &str) -> AppResult<Option<String>>;

    /// Keys of the `top_k` nearest documents, nearest first.
    fn knn(&self, index_name: &str, vector: &[f32], top_k: usize) -> AppResult<Vec<String>>;

    /// Send queued writes in one round trip.
    fn execute_batch(&self, ops: &[PendingOp]) -> AppResult<()>;

    /// Rewrite the append-only file in the background.
    fn snapshot(&self) -> AppResult<()>;

    /// Snapshot, then dump the whole database to disk.
    fn save(&self) -> AppResult<()>;
}

/// [`SearchClient`] backed by Redis with the RediSearch and RedisJSON modules.
///
/// A connection is opened per call; the client itself only holds the URL.
#[derive(Debug, Clone)]
pub struct RedisSearchClient {
    client: redis::Client,
}

impl RedisSearchClient {
    /// Open a client for `url` and check the server answers a ping.
    pub fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Remote(format!("Invalid Redis URL {}: {}", url, e)))?;
        let this = Self { client };

        let mut conn = this.connection()?;
        let _: String = redis::cmd("PING")
            .query(&mut conn)
            .map_err(|e| AppError::Remote(format!("Redis is not reachable at {}: {}", url, e)))?;

        tracing::info!("Connected to Redis at {}", url);
        Ok(this)
    }

    fn connection(&self) -> AppResult<redis::Connection> {
        self.client
            .get_connection()
            .map_err(|e| AppError::Remote(format!("Failed to connect to Redis: {}", e)))
    }

    fn scan_keys(conn: &mut redis::Connection, prefix: &str) -> AppResult<Vec<String>> {
        let pattern = format!("{}*", escape_glob(prefix));
        let keys: Vec<String> = conn
            .scan_match::<_, String>(pattern)
            .map_err(|e| AppError::Remote(format!("Failed to scan keys: {}", e)))?
            .collect();
        Ok(keys)
    }
}

fn remote_err(action: &str) -> impl Fn(redis::RedisError) -> AppError + '_ {
    move |e| AppError::Remote(format!("Failed to {}: {}", action, e))
}

/// Escape glob metacharacters so a prefix matches literally in SCAN.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Little-endian FLOAT32 blob, the layout KNN query parameters expect.
fn vector_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

impl SearchClient for RedisSearchClient {
    fn create_index(
        &self,
        index_name: &str,
        prefix: &str,
        dimension: usize,
    ) -> AppResult<IndexCreation> {
        let mut conn = self.connection()?;
        let result: redis::RedisResult<()> = redis::cmd("FT.CREATE")
            .arg(index_name)
            .arg("ON")
            .arg("JSON")
            .arg("PREFIX")
            .arg(1)
            .arg(prefix)
            .arg("SCHEMA")
            .arg("$")
            .arg("AS")
            .arg("vector")
            .arg("VECTOR")
            .arg("FLAT")
            .arg(6)
            .arg("TYPE")
            .arg("FLOAT32")
            .arg("DIM")
            .arg(dimension)
            .arg("DISTANCE_METRIC")
            .arg("COSINE")
            .query(&mut conn);

        match result {
            Ok(()) => Ok(IndexCreation::Created),
            Err(e) if e.to_string().contains("Index already exists") => {
                Ok(IndexCreation::AlreadyExists)
            }
            Err(e) => Err(remote_err("create index")(e)),
        }
    }

    fn drop_index(&self, index_name: &str) -> AppResult<bool> {
        let mut conn = self.connection()?;
        let result: redis::RedisResult<()> =
            redis::cmd("FT.DROPINDEX").arg(index_name).query(&mut conn);

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.to_string().to_lowercase().contains("unknown index") => Ok(false),
            Err(e) => Err(remote_err("drop index")(e)),
        }
    }

    fn set_vector(&self, key: &str, vector: &[f32]) -> AppResult<()> {
        let mut conn = self.connection()?;
        let json = serde_json::to_string(vector)?;
        redis::cmd("JSON.SET")
            .arg(key)
            .arg("$")
            .arg(json)
            .query::<()>(&mut conn)
            .map_err(remote_err("store vector"))
    }

    fn delete_key(&self, key: &str) -> AppResult<()> {
        let mut conn = self.connection()?;
        conn.del::<_, ()>(key).map_err(remote_err("delete key"))
    }

    fn delete_by_prefix(&self, prefix: &str) -> AppResult<usize> {
        let mut conn = self.connection()?;
        let keys = Self::scan_keys(&mut conn, prefix)?;
        for chunk in keys.chunks(500) {
            conn.del::<_, ()>(chunk).map_err(remote_err("delete keys"))?;
        }
        Ok(keys.len())
    }

    fn first_key_with_prefix(&self, prefix: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection()?;
        let pattern = format!("{}*", escape_glob(prefix));
        let mut iter = conn
            .scan_match::<_, String>(pattern)
            .map_err(remote_err("scan keys"))?;
        Ok(iter.next())
    }

    fn knn(&self, index_name: &str, vector: &[f32], top_k: usize) -> AppResult<Vec<String>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.connection()?;
        let reply: Vec<redis::Value> = redis::cmd("FT.SEARCH")
            .arg(index_name)
            .arg(format!("*=>[KNN {} @vector $BLOB AS score]", top_k))
            .arg("PARAMS")
            .arg(2)
            .arg("BLOB")
            .arg(vector_blob(vector))
            .arg("SORTBY")
            .arg("score")
            .arg("ASC")
            .arg("NOCONTENT")
            .arg("LIMIT")
            .arg(0)
            .arg(top_k)
            .arg("DIALECT")
            .arg(2)
            .query(&mut conn)
            .map_err(remote_err("search"))?;

        // First element is the total match count, the rest are document keys
        reply
            .iter()
            .skip(1)
            .map(|value| {
                redis::from_redis_value::<String>(value)
                    .map_err(|e| AppError::Remote(format!("Unexpected search reply: {}", e)))
            })
            .collect()
    }

    fn execute_batch(&self, ops: &[PendingOp]) -> AppResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for op in ops {
            match op {
                PendingOp::SetVector { key, vector } => {
                    pipe.cmd("JSON.SET")
                        .arg(key)
                        .arg("$")
                        .arg(serde_json::to_string(vector)?)
                        .ignore();
                }
                PendingOp::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }

        let mut conn = self.connection()?;
        pipe.query::<()>(&mut conn).map_err(remote_err("execute pipeline"))
    }

    fn snapshot(&self) -> AppResult<()> {
        let mut conn = self.connection()?;
        redis::cmd("BGREWRITEAOF")
            .query::<()>(&mut conn)
            .map_err(remote_err("rewrite append-only file"))
    }

    fn save(&self) -> AppResult<()> {
        self.snapshot()?;
        let mut conn = self.connection()?;
        redis::cmd("SAVE")
            .query::<()>(&mut conn)
            .map_err(remote_err("save database"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("photos:"), "photos:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[test]
    fn test_vector_blob_layout() {
        let blob = vector_blob(&[1.0, -2.0]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(&blob[4..], &(-2.0f32).to_le_bytes());
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        assert!(matches!(
            RedisSearchClient::connect("not a url").unwrap_err(),
            AppError::Remote(_)
        ));
    }
}

//! Instrumented key-value store client.
//!
//! # Responsibilities
//! - Expose a fixed command surface over any key-value adapter
//! - Time and log every command (the correlation id is logged, not sent)
//! - Connect lazily or eagerly, and check readiness before each command
//!
//! # Design Decisions
//! - One `execute` entry point; typed helpers decode its reply
//! - Values are bytes; they are only logged when the instance opts in

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::OnceCell;

use crate::client::error::{ClientError, StoreError};
use crate::client::failing::FailingClient;
use crate::client::instrument::{CallError, Instrumentation};
use crate::logging::metadata::Metadata;

impl CallError for StoreError {}

/// Commands understood by every key-value adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum KvCommand {
    Ping,
    Get { key: String },
    Set { key: String, value: Bytes, ttl: Option<Duration> },
    Del { keys: Vec<String> },
    Exists { key: String },
    Expire { key: String, ttl: Duration },
    Ttl { key: String },
    Incr { key: String, by: i64 },
    HGet { key: String, field: String },
    HSet { key: String, field: String, value: Bytes },
    HDel { key: String, fields: Vec<String> },
    HGetAll { key: String },
    LPush { key: String, values: Vec<Bytes> },
    RPush { key: String, values: Vec<Bytes> },
    LPop { key: String },
    RPop { key: String },
    LRange { key: String, start: i64, stop: i64 },
    SAdd { key: String, members: Vec<Bytes> },
    SRem { key: String, members: Vec<Bytes> },
    SMembers { key: String },
    ZAdd { key: String, score: f64, member: Bytes },
    ZRange { key: String, start: i64, stop: i64 },
    ZRem { key: String, members: Vec<Bytes> },
    Publish { channel: String, message: Bytes },
}

impl KvCommand {
    pub fn name(&self) -> &'static str {
        match self {
            KvCommand::Ping => "PING",
            KvCommand::Get { .. } => "GET",
            KvCommand::Set { .. } => "SET",
            KvCommand::Del { .. } => "DEL",
            KvCommand::Exists { .. } => "EXISTS",
            KvCommand::Expire { .. } => "EXPIRE",
            KvCommand::Ttl { .. } => "TTL",
            KvCommand::Incr { .. } => "INCRBY",
            KvCommand::HGet { .. } => "HGET",
            KvCommand::HSet { .. } => "HSET",
            KvCommand::HDel { .. } => "HDEL",
            KvCommand::HGetAll { .. } => "HGETALL",
            KvCommand::LPush { .. } => "LPUSH",
            KvCommand::RPush { .. } => "RPUSH",
            KvCommand::LPop { .. } => "LPOP",
            KvCommand::RPop { .. } => "RPOP",
            KvCommand::LRange { .. } => "LRANGE",
            KvCommand::SAdd { .. } => "SADD",
            KvCommand::SRem { .. } => "SREM",
            KvCommand::SMembers { .. } => "SMEMBERS",
            KvCommand::ZAdd { .. } => "ZADD",
            KvCommand::ZRange { .. } => "ZRANGE",
            KvCommand::ZRem { .. } => "ZREM",
            KvCommand::Publish { .. } => "PUBLISH",
        }
    }

    /// Keys touched by the command (the channel for `PUBLISH`).
    pub fn keys(&self) -> Vec<&str> {
        match self {
            KvCommand::Ping => Vec::new(),
            KvCommand::Del { keys } => keys.iter().map(String::as_str).collect(),
            KvCommand::Publish { channel, .. } => vec![channel.as_str()],
            KvCommand::Get { key }
            | KvCommand::Set { key, .. }
            | KvCommand::Exists { key }
            | KvCommand::Expire { key, .. }
            | KvCommand::Ttl { key }
            | KvCommand::Incr { key, .. }
            | KvCommand::HGet { key, .. }
            | KvCommand::HSet { key, .. }
            | KvCommand::HDel { key, .. }
            | KvCommand::HGetAll { key }
            | KvCommand::LPush { key, .. }
            | KvCommand::RPush { key, .. }
            | KvCommand::LPop { key }
            | KvCommand::RPop { key }
            | KvCommand::LRange { key, .. }
            | KvCommand::SAdd { key, .. }
            | KvCommand::SRem { key, .. }
            | KvCommand::SMembers { key }
            | KvCommand::ZAdd { key, .. }
            | KvCommand::ZRange { key, .. }
            | KvCommand::ZRem { key, .. } => vec![key.as_str()],
        }
    }

    fn values(&self) -> Vec<&Bytes> {
        match self {
            KvCommand::Set { value, .. } | KvCommand::HSet { value, .. } => vec![value],
            KvCommand::ZAdd { member, .. } => vec![member],
            KvCommand::Publish { message, .. } => vec![message],
            KvCommand::LPush { values, .. } | KvCommand::RPush { values, .. } => {
                values.iter().collect()
            }
            KvCommand::SAdd { members, .. }
            | KvCommand::SRem { members, .. }
            | KvCommand::ZRem { members, .. } => members.iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// Adapter reply.
#[derive(Debug, Clone, PartialEq)]
pub enum KvReply {
    Nil,
    Ok,
    Int(i64),
    Bulk(Bytes),
    Array(Vec<KvReply>),
}

impl KvReply {
    pub fn kind(&self) -> &'static str {
        match self {
            KvReply::Nil => "nil",
            KvReply::Ok => "ok",
            KvReply::Int(_) => "int",
            KvReply::Bulk(_) => "bulk",
            KvReply::Array(_) => "array",
        }
    }

    fn into_unit(self, command: &str) -> Result<(), ClientError> {
        match self {
            KvReply::Ok => Ok(()),
            KvReply::Bulk(b) if b.as_ref() == b"PONG" || b.as_ref() == b"OK" => Ok(()),
            _ => Err(StoreError::unexpected_reply(command).into()),
        }
    }

    fn into_int(self, command: &str) -> Result<i64, ClientError> {
        match self {
            KvReply::Int(n) => Ok(n),
            _ => Err(StoreError::unexpected_reply(command).into()),
        }
    }

    fn into_optional_bytes(self, command: &str) -> Result<Option<Bytes>, ClientError> {
        match self {
            KvReply::Nil => Ok(None),
            KvReply::Bulk(b) => Ok(Some(b)),
            _ => Err(StoreError::unexpected_reply(command).into()),
        }
    }

    fn into_bytes_list(self, command: &str) -> Result<Vec<Bytes>, ClientError> {
        match self {
            KvReply::Nil => Ok(Vec::new()),
            KvReply::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    KvReply::Bulk(b) => Ok(b),
                    _ => Err(StoreError::unexpected_reply(command).into()),
                })
                .collect(),
            _ => Err(StoreError::unexpected_reply(command).into()),
        }
    }
}

/// Capability a key-value library must provide to be instrumented.
#[async_trait]
pub trait KeyValueAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), StoreError>;

    /// Called before every command; reconnecting adapters wait here.
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn quit(&self) -> Result<(), StoreError>;

    async fn execute(&self, command: KvCommand) -> Result<KvReply, StoreError>;
}

/// Key-value adapter wrapped with call logging.
pub struct InstrumentedStore {
    adapter: Arc<dyn KeyValueAdapter>,
    instrumentation: Instrumentation,
    connected: OnceCell<()>,
}

impl InstrumentedStore {
    pub(crate) fn new(adapter: Arc<dyn KeyValueAdapter>, instrumentation: Instrumentation) -> Self {
        Self {
            adapter,
            instrumentation,
            connected: OnceCell::new(),
        }
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        self.connected
            .get_or_try_init(|| {
                self.instrumentation
                    .observe("connect", Metadata::new(), self.adapter.connect(), |_, _| {})
            })
            .await?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.initialized()
    }

    pub async fn quit(&self) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.instrumentation
            .observe("quit", Metadata::new(), self.adapter.quit(), |_, _| {})
            .await?;
        Ok(())
    }

    pub async fn execute(&self, command: KvCommand) -> Result<KvReply, ClientError> {
        self.connect().await?;

        let mut details = Metadata::new().with("keys", command.keys());
        if self.instrumentation.options().include_body {
            let values: Vec<_> = command
                .values()
                .into_iter()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect();
            if !values.is_empty() {
                details.insert("values", values);
            }
        }

        let name = command.name();
        let adapter = &self.adapter;
        let call = async move {
            adapter.ensure_ready().await?;
            adapter.execute(command).await
        };
        let reply = self
            .instrumentation
            .observe(name, details, call, |reply: &KvReply, metadata| {
                metadata.insert("reply", reply.kind());
            })
            .await?;
        Ok(reply)
    }
}

/// A configured key-value store instance.
pub enum StoreClient {
    Instrumented(InstrumentedStore),
    Failing(FailingClient),
}

impl StoreClient {
    pub fn instance(&self) -> &str {
        match self {
            StoreClient::Instrumented(client) => client.instrumentation.instance(),
            StoreClient::Failing(client) => client.instance(),
        }
    }

    pub fn is_failing(&self) -> bool {
        matches!(self, StoreClient::Failing(_))
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        match self {
            StoreClient::Instrumented(client) => client.connect().await,
            StoreClient::Failing(client) => Err(client.fail("connect").await),
        }
    }

    pub async fn quit(&self) -> Result<(), ClientError> {
        match self {
            StoreClient::Instrumented(client) => client.quit().await,
            StoreClient::Failing(client) => Err(client.fail("quit").await),
        }
    }

    pub async fn execute(&self, command: KvCommand) -> Result<KvReply, ClientError> {
        match self {
            StoreClient::Instrumented(client) => client.execute(command).await,
            StoreClient::Failing(client) => Err(client.fail(command.name()).await),
        }
    }

    pub(crate) async fn release(&self) -> Result<(), ClientError> {
        match self {
            StoreClient::Instrumented(client) => client.quit().await,
            StoreClient::Failing(_) => Ok(()),
        }
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        self.execute(KvCommand::Ping).await?.into_unit("PING")
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, ClientError> {
        self.execute(KvCommand::Get { key: key.to_string() })
            .await?
            .into_optional_bytes("GET")
    }

    pub async fn set(&self, key: &str, value: impl Into<Bytes>) -> Result<(), ClientError> {
        self.execute(KvCommand::Set {
            key: key.to_string(),
            value: value.into(),
            ttl: None,
        })
        .await?
        .into_unit("SET")
    }

    pub async fn set_ex(&self, key: &str, value: impl Into<Bytes>, ttl: Duration) -> Result<(), ClientError> {
        self.execute(KvCommand::Set {
            key: key.to_string(),
            value: value.into(),
            ttl: Some(ttl),
        })
        .await?
        .into_unit("SET")
    }

    pub async fn del(&self, keys: &[&str]) -> Result<i64, ClientError> {
        self.execute(KvCommand::Del {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        })
        .await?
        .into_int("DEL")
    }

    pub async fn exists(&self, key: &str) -> Result<bool, ClientError> {
        let n = self
            .execute(KvCommand::Exists { key: key.to_string() })
            .await?
            .into_int("EXISTS")?;
        Ok(n > 0)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ClientError> {
        let n = self
            .execute(KvCommand::Expire {
                key: key.to_string(),
                ttl,
            })
            .await?
            .into_int("EXPIRE")?;
        Ok(n == 1)
    }

    /// Remaining time to live; `None` when the key is missing or persistent.
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>, ClientError> {
        let secs = self
            .execute(KvCommand::Ttl { key: key.to_string() })
            .await?
            .into_int("TTL")?;
        Ok(u64::try_from(secs).ok().map(Duration::from_secs))
    }

    pub async fn incr_by(&self, key: &str, by: i64) -> Result<i64, ClientError> {
        self.execute(KvCommand::Incr {
            key: key.to_string(),
            by,
        })
        .await?
        .into_int("INCRBY")
    }

    pub async fn incr(&self, key: &str) -> Result<i64, ClientError> {
        self.incr_by(key, 1).await
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>, ClientError> {
        self.execute(KvCommand::HGet {
            key: key.to_string(),
            field: field.to_string(),
        })
        .await?
        .into_optional_bytes("HGET")
    }

    pub async fn hset(&self, key: &str, field: &str, value: impl Into<Bytes>) -> Result<i64, ClientError> {
        self.execute(KvCommand::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.into(),
        })
        .await?
        .into_int("HSET")
    }

    pub async fn hdel(&self, key: &str, fields: &[&str]) -> Result<i64, ClientError> {
        self.execute(KvCommand::HDel {
            key: key.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        })
        .await?
        .into_int("HDEL")
    }

    /// Field/value pairs of a hash.
    pub async fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>, ClientError> {
        let flat = self
            .execute(KvCommand::HGetAll { key: key.to_string() })
            .await?
            .into_bytes_list("HGETALL")?;
        if flat.len() % 2 != 0 {
            return Err(StoreError::unexpected_reply("HGETALL").into());
        }
        Ok(flat
            .chunks(2)
            .map(|pair| (String::from_utf8_lossy(&pair[0]).into_owned(), pair[1].clone()))
            .collect())
    }

    pub async fn lpush(&self, key: &str, values: Vec<Bytes>) -> Result<i64, ClientError> {
        self.execute(KvCommand::LPush {
            key: key.to_string(),
            values,
        })
        .await?
        .into_int("LPUSH")
    }

    pub async fn rpush(&self, key: &str, values: Vec<Bytes>) -> Result<i64, ClientError> {
        self.execute(KvCommand::RPush {
            key: key.to_string(),
            values,
        })
        .await?
        .into_int("RPUSH")
    }

    pub async fn lpop(&self, key: &str) -> Result<Option<Bytes>, ClientError> {
        self.execute(KvCommand::LPop { key: key.to_string() })
            .await?
            .into_optional_bytes("LPOP")
    }

    pub async fn rpop(&self, key: &str) -> Result<Option<Bytes>, ClientError> {
        self.execute(KvCommand::RPop { key: key.to_string() })
            .await?
            .into_optional_bytes("RPOP")
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>, ClientError> {
        self.execute(KvCommand::LRange {
            key: key.to_string(),
            start,
            stop,
        })
        .await?
        .into_bytes_list("LRANGE")
    }

    pub async fn sadd(&self, key: &str, members: Vec<Bytes>) -> Result<i64, ClientError> {
        self.execute(KvCommand::SAdd {
            key: key.to_string(),
            members,
        })
        .await?
        .into_int("SADD")
    }

    pub async fn srem(&self, key: &str, members: Vec<Bytes>) -> Result<i64, ClientError> {
        self.execute(KvCommand::SRem {
            key: key.to_string(),
            members,
        })
        .await?
        .into_int("SREM")
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<Bytes>, ClientError> {
        self.execute(KvCommand::SMembers { key: key.to_string() })
            .await?
            .into_bytes_list("SMEMBERS")
    }

    pub async fn zadd(&self, key: &str, score: f64, member: impl Into<Bytes>) -> Result<i64, ClientError> {
        self.execute(KvCommand::ZAdd {
            key: key.to_string(),
            score,
            member: member.into(),
        })
        .await?
        .into_int("ZADD")
    }

    pub async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>, ClientError> {
        self.execute(KvCommand::ZRange {
            key: key.to_string(),
            start,
            stop,
        })
        .await?
        .into_bytes_list("ZRANGE")
    }

    pub async fn zrem(&self, key: &str, members: Vec<Bytes>) -> Result<i64, ClientError> {
        self.execute(KvCommand::ZRem {
            key: key.to_string(),
            members,
        })
        .await?
        .into_int("ZREM")
    }

    /// Returns the number of receivers.
    pub async fn publish(&self, channel: &str, message: impl Into<Bytes>) -> Result<i64, ClientError> {
        self.execute(KvCommand::Publish {
            channel: channel.to_string(),
            message: message.into(),
        })
        .await?
        .into_int("PUBLISH")
    }
}

impl fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreClient")
            .field("instance", &self.instance())
            .field("failing", &self.is_failing())
            .finish()
    }
}

//! Command Handler Module
//!
//! This module implements every opcode of the binary protocol. It decodes a
//! complete request body, splits the payload into fields and applies the
//! operation to the storage engine, producing exactly one [`Reply`].
//!
//! The handler performs no I/O. A request it cannot even identify (too
//! short to hold an opcode, or an unknown opcode) is reported as a
//! [`DispatchError`] and the connection is dropped without a reply. Every
//! other failure, including malformed fields, becomes an error reply.
//!
//! ## Supported Opcodes
//!
//! ### Single Key
//! - `SET <ttl> <key> <value>` - Store a value, replying with it
//! - `TTL <key> <seconds>` - Restart the expiration window
//! - `GET <key>` - Read a value
//! - `DEL <key>` - Remove a key
//! - `INC <key>` / `DEC <key>` - Add ±1, creating the key if absent
//! - `LOCK <key> <seconds>` - Refuse writes for a while (`-1` = until UNLOCK)
//! - `UNLOCK <key>` - Clear a lock
//! - `META <key> <field>` - One item attribute as a number
//!
//! ### Multi Key (literal prefix)
//! - `MSET`, `MTTL`, `MGET`, `MDEL`, `MINC`, `MDEC`, `MLOCK`, `MUNLOCK`
//! - `COUNT <prefix>` - Number of live keys
//! - `KEYS <prefix>` - Matching keys
//!
//! ### Server
//! - `STATS` - Server counters
//! - `PING` - Liveness check
//! - `END` - Reply OK, then close the connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  decode()   │───>│  execute()  │───>│  op_xxx()   │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      StorageEngine          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::{FieldParser, Limits, Opcode, ParseError, Reply};
use crate::storage::{parse_arg, MetaField, StorageEngine, StoreError, StoreResult, Value};
use bytes::{Buf, Bytes};
use tracing::{debug, trace};

/// A decoded request: the opcode and the raw field payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Request {
    /// Decodes a request body (everything after the length prefix).
    pub fn decode(mut body: Bytes) -> Result<Self, DispatchError> {
        if body.len() < 2 {
            return Err(DispatchError::Truncated { len: body.len() });
        }
        let raw = body.get_u16_le();
        let opcode = Opcode::try_from(raw).map_err(DispatchError::UnknownOpcode)?;
        Ok(Self {
            opcode,
            payload: body,
        })
    }
}

/// Requests that cannot be answered and must close the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("request of {len} bytes is too short to hold an opcode")]
    Truncated { len: usize },

    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
}

/// Executes requests against a storage engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandHandler {
    parser: FieldParser,
}

impl CommandHandler {
    /// Creates a handler enforcing the given key/value limits.
    pub fn new(limits: Limits) -> Self {
        Self {
            parser: FieldParser::new(limits),
        }
    }

    /// Decodes and executes one request body.
    ///
    /// # Arguments
    ///
    /// * `engine` - The storage engine to operate on
    /// * `body` - The request bytes following the length prefix
    ///
    /// # Returns
    ///
    /// The reply to send, or a [`DispatchError`] if the connection must be dropped.
    pub fn execute(&self, engine: &mut StorageEngine, body: Bytes) -> Result<Reply, DispatchError> {
        let request = Request::decode(body)?;
        Ok(self.dispatch(engine, &request))
    }

    /// Executes an already decoded request.
    pub fn dispatch(&self, engine: &mut StorageEngine, request: &Request) -> Reply {
        engine.stats_mut().total_requests += 1;
        trace!(
            opcode = %request.opcode,
            payload_len = request.payload.len(),
            "Dispatching request"
        );

        let p = &request.payload;
        let result = match request.opcode {
            Opcode::Set => self.op_set(engine, p),
            Opcode::Ttl => self.op_ttl(engine, p),
            Opcode::Get => self.op_get(engine, p),
            Opcode::Del => self.op_del(engine, p),
            Opcode::Inc => self.op_incr(engine, p, 1),
            Opcode::Dec => self.op_incr(engine, p, -1),
            Opcode::Lock => self.op_lock(engine, p),
            Opcode::Unlock => self.op_unlock(engine, p),
            Opcode::Meta => self.op_meta(engine, p),

            Opcode::MSet => self.op_mset(engine, p),
            Opcode::MTtl => self.op_mttl(engine, p),
            Opcode::MGet => self.op_mget(engine, p),
            Opcode::MDel => self.op_mdel(engine, p),
            Opcode::MInc => self.op_mincr(engine, p, 1),
            Opcode::MDec => self.op_mincr(engine, p, -1),
            Opcode::MLock => self.op_mlock(engine, p),
            Opcode::MUnlock => self.op_munlock(engine, p),
            Opcode::Count => self.op_count(engine, p),
            Opcode::Keys => self.op_keys(engine, p),

            Opcode::Stats => Ok(Ok(stats_reply(engine))),
            Opcode::Ping | Opcode::End => Ok(Ok(Reply::ok())),
        };

        match result {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => store_error_reply(e),
            Err(e) => {
                debug!(opcode = %request.opcode, error = %e, "Malformed request fields");
                Reply::error()
            }
        }
    }

    // ========================================================================
    // Single-Key Operations
    // ========================================================================

    fn op_set(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let (ttl, key, value) = self.parser.ttl_key_value(p)?;
        Ok(engine.set(&key, value, ttl).map(Reply::Value))
    }

    fn op_ttl(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let (key, ttl) = self.parser.key_number(p, "ttl")?;
        Ok(parse_arg(&ttl)
            .and_then(|ttl| engine.ttl(&key, ttl))
            .map(|()| Reply::ok()))
    }

    fn op_get(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let key = self.parser.key(p)?;
        Ok(engine.get(&key).map(Reply::Value))
    }

    fn op_del(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let key = self.parser.key(p)?;
        Ok(engine.del(&key).map(|()| Reply::ok()))
    }

    fn op_incr(
        &self,
        engine: &mut StorageEngine,
        p: &Bytes,
        delta: i64,
    ) -> Result<StoreResult<Reply>, ParseError> {
        let key = self.parser.key(p)?;
        Ok(engine.incr(&key, delta).map(Reply::number))
    }

    fn op_lock(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let (key, seconds) = self.parser.key_number(p, "seconds")?;
        Ok(parse_arg(&seconds)
            .and_then(|seconds| engine.lock(&key, seconds))
            .map(|()| Reply::ok()))
    }

    fn op_unlock(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let key = self.parser.key(p)?;
        Ok(engine.unlock(&key).map(|()| Reply::ok()))
    }

    fn op_meta(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let (key, field) = self.parser.key_number(p, "field")?;
        let field = MetaField::parse(&field).ok_or(ParseError::MissingField("field"))?;
        Ok(engine.meta(&key, field).map(Reply::number))
    }

    // ========================================================================
    // Multi-Key Operations
    // ========================================================================

    fn op_mset(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let (prefix, value) = self.parser.key_value(p)?;
        Ok(engine.mset(&prefix, value).map(Reply::count))
    }

    fn op_mttl(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let (prefix, ttl) = self.parser.key_number(p, "ttl")?;
        Ok(parse_arg(&ttl)
            .and_then(|ttl| engine.mttl(&prefix, ttl))
            .map(Reply::count))
    }

    fn op_mget(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let prefix = self.parser.key(p)?;
        Ok(engine.mget(&prefix).map(Reply::KeyValues))
    }

    fn op_mdel(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let prefix = self.parser.key(p)?;
        Ok(engine.mdel(&prefix).map(Reply::count))
    }

    fn op_mincr(
        &self,
        engine: &mut StorageEngine,
        p: &Bytes,
        delta: i64,
    ) -> Result<StoreResult<Reply>, ParseError> {
        let prefix = self.parser.key(p)?;
        Ok(engine.mincr(&prefix, delta).map(Reply::count))
    }

    fn op_mlock(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let (prefix, seconds) = self.parser.key_number(p, "seconds")?;
        Ok(parse_arg(&seconds)
            .and_then(|seconds| engine.mlock(&prefix, seconds))
            .map(Reply::count))
    }

    fn op_munlock(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let prefix = self.parser.key(p)?;
        Ok(engine.munlock(&prefix).map(Reply::count))
    }

    fn op_count(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let prefix = self.parser.key(p)?;
        Ok(engine.count(&prefix).map(Reply::count))
    }

    fn op_keys(&self, engine: &mut StorageEngine, p: &Bytes) -> Result<StoreResult<Reply>, ParseError> {
        let prefix = self.parser.key(p)?;
        Ok(engine.keys(&prefix).map(|keys| {
            Reply::KeyValues(
                keys.into_iter()
                    .enumerate()
                    .map(|(i, key)| (Bytes::from(i.to_string()), Value::Plain(key)))
                    .collect(),
            )
        }))
    }
}

fn store_error_reply(error: StoreError) -> Reply {
    match error {
        StoreError::NotFound => Reply::not_found(),
        StoreError::NotANumber => Reply::nan(),
        StoreError::OutOfMemory => Reply::out_of_memory(),
        StoreError::Locked => Reply::locked(),
        StoreError::Corrupt => Reply::error(),
    }
}

// ============================================================================
// STATS
// ============================================================================

fn number(name: &'static str, n: i64) -> (Bytes, Value) {
    (Bytes::from_static(name.as_bytes()), Value::Number(n))
}

fn text(name: &'static str, s: String) -> (Bytes, Value) {
    (Bytes::from_static(name.as_bytes()), Value::Plain(Bytes::from(s)))
}

/// Builds the STATS key/value set.
fn stats_reply(engine: &StorageEngine) -> Reply {
    let stats = engine.stats();
    let usable = engine.config().max_memory;
    let build = if cfg!(debug_assertions) { "debug" } else { "release" };

    Reply::KeyValues(vec![
        text("server_version", crate::VERSION.to_string()),
        text("server_build_datetime", build.to_string()),
        text("server_allocator", "system".to_string()),
        text(
            "server_arch",
            format!("{} ({} bit)", std::env::consts::ARCH, usize::BITS),
        ),
        number("server_started", stats.started),
        number("server_time", engine.now()),
        number("first_item_seen", stats.first_item_seen),
        number("last_item_seen", stats.last_item_seen),
        number("total_items", stats.total_items as i64),
        number("total_compressed_items", stats.total_compressed_items as i64),
        number("total_clients", stats.total_clients as i64),
        number("total_cron_done", stats.total_cron_done as i64),
        number("total_connections", stats.total_connections as i64),
        number("total_requests", stats.total_requests as i64),
        number("memory_available", stats.os_memory.available as i64),
        number("memory_usable", usable as i64),
        number("memory_used", stats.memory_used as i64),
        number("memory_peak", stats.memory_peak as i64),
        text("memory_fragmentation", format!("{:.2}", stats.memory_fragmentation())),
        text("item_size_avg", format!("{:.2}", stats.item_size_avg())),
        text("compr_rate_avg", format!("{:.2}", stats.compr_rate_avg())),
        text("reqs_per_client_avg", format!("{:.2}", stats.reqs_per_client_avg())),
    ])
}

//! Runtime: evaluate a query once, then serve its result through cursors.
//!
//! - `start` builds a fresh `Env`, runs the query closure in it and either
//!   answers a scalar directly or registers the resulting stream under the
//!   client's token and serves the first chunk.
//! - `continue_query` and `stop` act on an open cursor.
//! - Every failure becomes an ERROR response; nothing here panics on user
//!   input.

use std::collections::BTreeMap;
use std::sync::Arc;

use docql_core::config::EngineConfig;
use docql_core::datum::{Datum, DatumType};
use docql_core::error::{Error, Result};
use docql_core::id::CursorToken;
use docql_core::signal::Interruptor;
use docql_env::Env;
use docql_io::metadata::MetadataView;
use docql_io::storage::Storage;
use docql_operators::{DatumStream, Value};

use crate::metrics::emit_span;
use crate::response::Response;
use crate::stream_cache::StreamCache;

/// Engine owns the collaborators every query environment is built over and
/// the cursors of in-flight results.
pub struct Engine {
    config: EngineConfig,
    storage: Arc<dyn Storage>,
    metadata: MetadataView,
    cache: StreamCache,
}

impl Engine {
    pub fn new(config: EngineConfig, storage: Arc<dyn Storage>, metadata: MetadataView) -> Result<Self> {
        config.validate()?;
        let cache = StreamCache::new(&config);
        Ok(Self {
            config,
            storage,
            metadata,
            cache,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metadata(&self) -> &MetadataView {
        &self.metadata
    }

    /// Tokens with an open cursor, ascending.
    pub fn open_cursors(&self) -> Vec<CursorToken> {
        self.cache.tokens()
    }

    /// Evaluate `query` under `token` and answer with its first chunk.
    pub fn start<F>(
        &mut self,
        token: CursorToken,
        optargs: BTreeMap<String, Datum>,
        interruptor: &Interruptor,
        query: F,
    ) -> Response
    where
        F: FnOnce(&mut Env) -> Result<Value>,
    {
        emit_span("query_start", &[("token", token.get().to_string())]);
        self.try_start(token, optargs, interruptor, query)
            .unwrap_or_else(|e| Response::error(token, &e))
    }

    fn try_start<F>(
        &mut self,
        token: CursorToken,
        optargs: BTreeMap<String, Datum>,
        interruptor: &Interruptor,
        query: F,
    ) -> Result<Response>
    where
        F: FnOnce(&mut Env) -> Result<Value>,
    {
        if self.cache.contains(token) {
            return Err(Error::invariant(format!("cursor token {token} already in use")));
        }
        let mut env = Env::new(
            Arc::clone(&self.storage),
            self.metadata.clone(),
            interruptor.clone(),
            self.config.clone(),
        )?;
        env.init_optargs(optargs)?;

        let value = query(&mut env)?;
        let stream = match value {
            Value::Datum(r) | Value::SingleSelection(_, r) => {
                if env.node(r)?.get_type() != DatumType::Array {
                    return Ok(Response::success(token, vec![env.to_datum(r)?]));
                }
                DatumStream::from_array(&env, r)?
            }
            v @ (Value::Table(_) | Value::Selection(..) | Value::Sequence(_)) => v.as_seq(&mut env)?,
            other => {
                return Err(Error::query(format!(
                    "Query result must be of type DATUM or SEQUENCE (got {}).",
                    other.get_type()
                )))
            }
        };

        self.cache.insert(token, env, stream)?;
        self.cache.serve(token, interruptor)
    }

    /// Next chunk of an open cursor.
    pub fn continue_query(&mut self, token: CursorToken, interruptor: &Interruptor) -> Response {
        self.cache
            .serve(token, interruptor)
            .unwrap_or_else(|e| Response::error(token, &e))
    }

    /// Close a cursor without draining it.
    pub fn stop(&mut self, token: CursorToken) -> Response {
        if !self.cache.contains(token) {
            return Response::error(token, &Error::UnknownCursor(token.get()));
        }
        match self.cache.erase(token) {
            Ok(()) => Response::success(token, Vec::new()),
            Err(e) => Response::error(token, &e),
        }
    }
}

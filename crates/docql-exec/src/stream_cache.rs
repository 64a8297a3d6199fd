//! Open cursors, keyed by client token.
//!
//! Each entry owns the environment its stream was built in, so the stream's
//! heap values stay alive between requests. Values allocated while serving
//! land in a cursor arena pushed at insert, which is collected after every
//! batch; the query's own arena below it is left alone. A served batch holds back one
//! element as lookahead: a full batch therefore always means more data, and
//! the next request never has to probe an exhausted stream.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use docql_core::config::EngineConfig;
use docql_core::datum::Datum;
use docql_core::error::{Error, Result};
use docql_core::id::CursorToken;
use docql_core::signal::Interruptor;
use docql_env::{DatumRef, Env};
use docql_operators::DatumStream;

use crate::fail_point;
use crate::metrics::emit_span;
use crate::response::Response;

struct Entry {
    env: Env,
    stream: DatumStream,
    lookahead: Option<DatumRef>,
    last_activity: Instant,
    max_chunk_size: usize,
    #[allow(dead_code)]
    max_age: Duration,
}

pub struct StreamCache {
    streams: HashMap<CursorToken, Entry>,
    max_chunk_size: usize,
    max_age: Duration,
}

impl StreamCache {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            streams: HashMap::new(),
            max_chunk_size: config.max_chunk_size,
            max_age: Duration::from_secs(config.max_cursor_age_secs),
        }
    }

    pub fn contains(&self, token: CursorToken) -> bool {
        self.streams.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn tokens(&self) -> Vec<CursorToken> {
        let mut out: Vec<_> = self.streams.keys().copied().collect();
        out.sort();
        out
    }

    /// Time since `token` was inserted or last served.
    pub fn idle_time(&self, token: CursorToken) -> Option<Duration> {
        self.streams.get(&token).map(|e| e.last_activity.elapsed())
    }

    /// Register a stream. Tokens are unique while live.
    pub fn insert(&mut self, token: CursorToken, mut env: Env, stream: DatumStream) -> Result<()> {
        self.maybe_evict();
        if self.streams.contains_key(&token) {
            return Err(Error::invariant(format!("cursor token {token} already in use")));
        }
        env.checkpoint();
        self.streams.insert(
            token,
            Entry {
                env,
                stream,
                lookahead: None,
                last_activity: Instant::now(),
                max_chunk_size: self.max_chunk_size,
                max_age: self.max_age,
            },
        );
        emit_span("cursor_insert", &[("token", token.get().to_string())]);
        Ok(())
    }

    pub fn erase(&mut self, token: CursorToken) -> Result<()> {
        match self.streams.remove(&token) {
            Some(_) => {
                emit_span("cursor_evict", &[("token", token.get().to_string())]);
                Ok(())
            }
            None => Err(Error::invariant(format!("erase of unknown cursor {token}"))),
        }
    }

    /// Serve the next chunk of `token`'s stream.
    ///
    /// The entry is evicted when its stream is exhausted and whenever
    /// draining fails; the failure is then returned.
    pub fn serve(&mut self, token: CursorToken, interruptor: &Interruptor) -> Result<Response> {
        let entry = self
            .streams
            .get_mut(&token)
            .ok_or(Error::UnknownCursor(token.get()))?;
        entry.last_activity = Instant::now();
        // The request that built the stream may be long gone.
        entry.env.set_interruptor(interruptor.clone());

        match serve_entry(entry) {
            Ok((data, exhausted)) => {
                emit_span(
                    "cursor_serve",
                    &[
                        ("token", token.get().to_string()),
                        ("docs", data.len().to_string()),
                        ("exhausted", exhausted.to_string()),
                    ],
                );
                if exhausted {
                    self.erase(token)?;
                    Ok(Response::success(token, data))
                } else {
                    Ok(Response::partial(token, data))
                }
            }
            Err(e) => {
                self.erase(token)?;
                Err(e)
            }
        }
    }

    // Idle cursors are never evicted; `max_age` is recorded but unused.
    fn maybe_evict(&mut self) {}
}

fn serve_entry(entry: &mut Entry) -> Result<(Vec<Datum>, bool)> {
    fail_point!("cursor_serve");
    let Entry {
        env,
        stream,
        lookahead,
        max_chunk_size,
        ..
    } = entry;
    let max = *max_chunk_size;

    let mut data = Vec::new();
    if let Some(r) = lookahead.take() {
        data.push(env.to_datum(r)?);
    }
    // One more than fits, so a full pull proves the stream has more.
    let want = if max == 0 { 0 } else { max - data.len() + 1 };
    let mut batch = stream.next_batch(env, want)?;
    let exhausted = want == 0 || batch.len() < want;
    if exhausted {
        for r in batch {
            data.push(env.to_datum(r)?);
        }
        return Ok((data, true));
    }
    *lookahead = batch.pop();
    for r in batch {
        data.push(env.to_datum(r)?);
    }

    // Served documents now live in `data`; keep only what the stream holds.
    let mut roots = stream.retained();
    roots.extend(lookahead.iter().copied());
    env.gc_roots(&roots)?;
    Ok((data, exhausted))
}

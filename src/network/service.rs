//! Request dispatcher
//!
//! Validates requests and routes them: reads against the state engine,
//! writes through the mode-specific write path, searches against the
//! index observers when enabled.

use std::sync::Arc;

use crate::engine::{StateEngine, WritePath};
use crate::error::{MeridianError, Result};
use crate::index::{EmbeddingIndex, FullTextIndex};
use crate::protocol::{Request, Response};
use crate::wal::Operation;

use super::RequestHandler;

/// Search indexes attached to a node
pub struct SearchIndexes {
    pub fulltext: Arc<FullTextIndex>,
    pub embedding: Arc<EmbeddingIndex>,
}

/// The standard request handler shared by all modes
pub struct KvService {
    engine: Arc<StateEngine>,
    write_path: Arc<dyn WritePath>,
    indexes: Option<SearchIndexes>,
}

impl KvService {
    pub fn new(
        engine: Arc<StateEngine>,
        write_path: Arc<dyn WritePath>,
        indexes: Option<SearchIndexes>,
    ) -> Self {
        KvService {
            engine,
            write_path,
            indexes,
        }
    }

    /// Build a service with indexes created, registered on the engine,
    /// and driven from the recovered map, when the config asks for them.
    pub fn with_optional_indexes(
        engine: Arc<StateEngine>,
        write_path: Arc<dyn WritePath>,
        enable_indexes: bool,
    ) -> Self {
        let indexes = if enable_indexes {
            let fulltext = Arc::new(FullTextIndex::new());
            let embedding = Arc::new(EmbeddingIndex::new());
            engine.register_observer(fulltext.clone());
            engine.register_observer(embedding.clone());
            Some(SearchIndexes {
                fulltext,
                embedding,
            })
        } else {
            None
        };
        KvService::new(engine, write_path, indexes)
    }

    fn dispatch(&self, request: Request) -> Result<Response> {
        match request {
            Request::Get { key } => {
                validate_key(&key)?;
                Ok(match self.engine.get(&key) {
                    Some(value) => Response::with_value(value),
                    None => Response::not_found(),
                })
            }
            Request::Set {
                key,
                value,
                debug_simulate_fail,
            } => {
                validate_key(&key)?;
                self.write_path
                    .submit(Operation::Set { key, value }, debug_simulate_fail)?;
                Ok(Response::ok())
            }
            Request::Delete {
                key,
                debug_simulate_fail,
            } => {
                validate_key(&key)?;
                self.write_path
                    .submit(Operation::Delete { key }, debug_simulate_fail)?;
                Ok(Response::ok())
            }
            Request::BulkSet {
                pairs,
                debug_simulate_fail,
            } => {
                if pairs.is_empty() {
                    return Ok(Response::ok());
                }
                for (key, _) in &pairs {
                    validate_key(key)?;
                }
                self.write_path
                    .submit(Operation::BulkSet { pairs }, debug_simulate_fail)?;
                Ok(Response::ok())
            }
            Request::Search { query } => {
                let indexes = self.indexes.as_ref().ok_or(MeridianError::IndexesDisabled)?;
                Ok(Response::with_keys(indexes.fulltext.search(&query)))
            }
            Request::SearchSimilar { query, top_k } => {
                let indexes = self.indexes.as_ref().ok_or(MeridianError::IndexesDisabled)?;
                Ok(Response::with_matches(
                    indexes.embedding.search_similar(&query, top_k),
                ))
            }
        }
    }
}

impl RequestHandler for KvService {
    fn handle(&self, request: Request) -> Response {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => Response::from_error(&e),
        }
    }

    fn healthy(&self) -> bool {
        self.engine.healthy()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(MeridianError::Protocol("empty key".to_string()));
    }
    Ok(())
}

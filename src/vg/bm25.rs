//! BM25 text-index virtual graph: registration/lifecycle contract only.
//!
//! BM25 graphs are stateful: they are eagerly initialized at create time
//! and subscribe to their single source ledger so upserts keep the index
//! warm. Scoring internals live behind this contract and are not part of
//! the federation core.

use crate::error::{VgError, VgResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// BM25 index parameters persisted in the nameservice record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Config {
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_b")]
    pub b: f64,
}

fn default_k1() -> f64 {
    1.2
}

fn default_b() -> f64 {
    0.75
}

impl Default for Bm25Config {
    fn default() -> Self {
        Bm25Config {
            k1: default_k1(),
            b: default_b(),
        }
    }
}

#[derive(Debug, Default)]
struct Bm25State {
    initialized: bool,
    upserts_seen: u64,
}

/// A registered BM25 virtual graph
#[derive(Debug)]
pub struct Bm25Graph {
    alias: String,
    /// the single source ledger this index follows
    ledger: String,
    config: Bm25Config,
    state: Mutex<Bm25State>,
}

impl Bm25Graph {
    pub fn new(alias: String, ledger: String, config: Bm25Config) -> Self {
        Bm25Graph {
            alias,
            ledger,
            config,
            state: Mutex::new(Bm25State::default()),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn ledger(&self) -> &str {
        &self.ledger
    }

    pub fn config(&self) -> &Bm25Config {
        &self.config
    }

    /// Eager warm-up at create time
    pub fn initialize(&self) -> VgResult<()> {
        let mut state = self.state.lock();
        state.initialized = true;
        Ok(())
    }

    /// Ledger-change notification (subscription contract)
    pub fn upsert(&self) -> VgResult<()> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(VgError::InvalidConfig {
                field: self.alias.clone(),
                reason: "bm25 graph received upsert before initialize".to_string(),
            });
        }
        state.upserts_seen += 1;
        Ok(())
    }

    pub fn close(&self) -> VgResult<()> {
        self.state.lock().initialized = false;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn upserts_seen(&self) -> u64 {
        self.state.lock().upserts_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let graph = Bm25Graph::new(
            "idx:main".to_string(),
            "ledger:main".to_string(),
            Bm25Config::default(),
        );
        assert!(!graph.is_initialized());
        assert!(graph.upsert().is_err());

        graph.initialize().unwrap();
        assert!(graph.is_initialized());
        graph.upsert().unwrap();
        graph.upsert().unwrap();
        assert_eq!(graph.upserts_seen(), 2);

        graph.close().unwrap();
        assert!(!graph.is_initialized());
    }
}

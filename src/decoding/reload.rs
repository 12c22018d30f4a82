use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::chain::Chain;

#[derive(Debug)]
struct ReloadState<C: Chain> {
    /// Decoder name to the transactions that asked for it to be reloaded.
    waiting: HashMap<String, Vec<C::TxRef>>,
    /// Transactions to decode again because a decoder they waited on was
    /// reloaded.
    pending: Vec<C::TxRef>,
}

/// Remembers which decoded transactions depend on a decoder reload and hands
/// them out once that reload happened.
#[derive(Debug)]
pub struct ReloadTracker<C: Chain> {
    state: Mutex<ReloadState<C>>,
}

impl<C: Chain> Default for ReloadTracker<C> {
    fn default() -> Self {
        Self {
            state: Mutex::new(ReloadState {
                waiting: HashMap::new(),
                pending: Vec::new(),
            }),
        }
    }
}

impl<C: Chain> ReloadTracker<C> {
    pub fn record(&self, tx_ref: &C::TxRef, decoders: &HashSet<String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for name in decoders {
            let waiting = state.waiting.entry(name.clone()).or_default();
            if !waiting.contains(tx_ref) {
                waiting.push(tx_ref.clone());
            }
        }
    }

    /// Moves every transaction waiting on `decoder` to the pending set.
    pub fn mark_reloaded(&self, decoder: &str) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(waiting) = state.waiting.remove(decoder) else {
            return 0;
        };
        let count = waiting.len();
        for tx_ref in waiting {
            if !state.pending.contains(&tx_ref) {
                state.pending.push(tx_ref);
            }
        }
        count
    }

    pub fn take_pending(&self) -> Vec<C::TxRef> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut state.pending)
    }
}

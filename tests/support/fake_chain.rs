use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use swap_nursery::chain::{
    ConfirmationError, TransactionHandle, TransactionLookup, TransactionProvider,
};

/// Scripted [`TransactionProvider`]. Lookups replay a per-transaction script
/// whose last entry sticks; unscripted transactions are absent. Confirmation
/// waits without a scripted outcome never resolve.
#[derive(Default)]
pub struct FakeChain {
    lookups: Mutex<HashMap<String, VecDeque<TransactionLookup>>>,
    outcomes: Mutex<HashMap<String, Result<(), ConfirmationError>>>,
    lookup_calls: AtomicUsize,
    watched: Mutex<Vec<String>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_lookups(&self, id: &str, script: Vec<TransactionLookup>) {
        self.lookups
            .lock()
            .unwrap()
            .insert(id.to_string(), script.into());
    }

    /// Shorthand for a transaction that is found and confirms with `outcome`.
    pub fn known(&self, id: &str, outcome: Result<(), ConfirmationError>) {
        self.script_lookups(id, vec![found(id)]);
        self.outcomes
            .lock()
            .unwrap()
            .insert(id.to_string(), outcome);
    }

    pub fn set_outcome(&self, id: &str, outcome: Result<(), ConfirmationError>) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(id.to_string(), outcome);
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn watched(&self) -> Vec<String> {
        self.watched.lock().unwrap().clone()
    }
}

pub fn found(id: &str) -> TransactionLookup {
    TransactionLookup::Found(TransactionHandle::new(id))
}

#[async_trait]
impl TransactionProvider for FakeChain {
    async fn get_transaction(&self, id: &str) -> TransactionLookup {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);

        let mut lookups = self.lookups.lock().unwrap();
        let Some(script) = lookups.get_mut(id) else {
            return TransactionLookup::DefinitelyAbsent;
        };
        if script.len() > 1 {
            script.pop_front().unwrap_or(TransactionLookup::DefinitelyAbsent)
        } else {
            script
                .front()
                .cloned()
                .unwrap_or(TransactionLookup::DefinitelyAbsent)
        }
    }

    async fn await_confirmations(
        &self,
        handle: &TransactionHandle,
        _confirmations: u32,
    ) -> Result<(), ConfirmationError> {
        self.watched.lock().unwrap().push(handle.id.clone());

        let outcome = self.outcomes.lock().unwrap().get(&handle.id).cloned();
        match outcome {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }
}

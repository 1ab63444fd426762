//! Keyed debounced-action primitive
//!
//! Every component that delays work behind a quiet period goes through this
//! instead of managing its own timer handles. Scheduling under a key that
//! already has a pending action cancels the pending one first, so at most
//! one delayed action per key ever fires.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct Debouncer {
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Run `action` after `delay`, superseding any action still pending
    /// under the same `key`.
    pub fn schedule<F>(&self, key: &str, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });

        let mut pending = self.pending.lock().unwrap();
        if let Some(previous) = pending.insert(key.to_string(), handle) {
            previous.abort();
        }
    }

    /// Cancel the pending action under `key`, if any
    pub fn cancel(&self, key: &str) {
        if let Some(handle) = self.pending.lock().unwrap().remove(key) {
            handle.abort();
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.pending.lock().unwrap().drain() {
            handle.abort();
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

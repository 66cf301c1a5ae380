//! An in-process [`Substrate`]: a mutexed key tree with TTL expiry, plus a
//! bounded change-history ring so watchers can resume by modification
//! index just like against the real store. History falling off the ring
//! surfaces as `HistoryGone`, which is exactly the condition the
//! change-feed consumer has to survive in production.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use mediafabric_core::error::SubstrateError;
use mediafabric_core::substrate::{ChangeAction, ChangeEvent, KeyValue, Substrate, WatchOutcome, Written};

const DEFAULT_HISTORY: usize = 1000;

pub struct MemorySubstrate {
    state: Mutex<State>,
    notify: Notify,
    history_capacity: usize,
}

struct State {
    entries: BTreeMap<String, Entry>,
    index: u64,
    history: VecDeque<ChangeEvent>,
    /// Index of the oldest event still in `history`; anything older has
    /// been evicted.
    oldest_retained: u64,
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool { self.expires_at.is_none_or(|at| at > Instant::now()) }
}

impl Default for MemorySubstrate {
    fn default() -> Self { Self::new() }
}

impl MemorySubstrate {
    pub fn new() -> Self { Self::with_history_capacity(DEFAULT_HISTORY) }

    /// A small capacity makes the history-gap path easy to provoke.
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: BTreeMap::new(),
                index: 0,
                history: VecDeque::new(),
                oldest_retained: 1,
            }),
            notify: Notify::new(),
            history_capacity: capacity.max(1),
        }
    }
}

fn canon(key: &str) -> String { key.trim_matches('/').to_string() }

fn ttl_deadline(ttl: Option<Duration>) -> Option<Instant> { ttl.map(|t| Instant::now() + t) }

impl State {
    fn record(&mut self, capacity: usize, action: ChangeAction, key: &str, value: Option<String>, prev: Option<String>) {
        self.index += 1;
        self.history.push_back(ChangeEvent {
            action,
            key: format!("/{key}"),
            value,
            prev_value: prev,
            modified_index: self.index,
        });
        while self.history.len() > capacity {
            if let Some(evicted) = self.history.pop_front() {
                self.oldest_retained = evicted.modified_index + 1;
            }
        }
    }

    fn live_value(&self, key: &str) -> Option<&Entry> { self.entries.get(key).filter(|e| e.live()) }

    /// Keys equal to or nested under `prefix`.
    fn under(&self, prefix: &str) -> Vec<String> {
        let nested = format!("{prefix}/");
        self.entries
            .keys()
            .filter(|k| k.as_str() == prefix || k.starts_with(&nested))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Substrate for MemorySubstrate {
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Written, SubstrateError> {
        let key = canon(key);
        let mut state = self.state.lock().unwrap();
        let prev = state.live_value(&key).map(|e| e.value.clone());
        state.entries.insert(key.clone(), Entry { value: value.to_string(), expires_at: ttl_deadline(ttl) });
        state.record(self.history_capacity, ChangeAction::Set, &key, Some(value.to_string()), prev.clone());
        drop(state);
        self.notify.notify_waiters();
        Ok(if prev.is_some() { Written::Updated } else { Written::Created })
    }

    async fn create_exclusive(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, SubstrateError> {
        let key = canon(key);
        let mut state = self.state.lock().unwrap();
        if state.live_value(&key).is_some() {
            return Ok(false);
        }
        state.entries.insert(key.clone(), Entry { value: value.to_string(), expires_at: ttl_deadline(Some(ttl)) });
        state.record(self.history_capacity, ChangeAction::Set, &key, Some(value.to_string()), None);
        drop(state);
        self.notify.notify_waiters();
        Ok(true)
    }

    async fn refresh(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SubstrateError> {
        let key = canon(key);
        let mut state = self.state.lock().unwrap();
        if state.live_value(&key).is_none() {
            return Err(SubstrateError::NotFound(key));
        }
        let prev = state.entries.get(&key).map(|e| e.value.clone());
        state.entries.insert(key.clone(), Entry { value: value.to_string(), expires_at: ttl_deadline(Some(ttl)) });
        state.record(self.history_capacity, ChangeAction::Set, &key, Some(value.to_string()), prev);
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SubstrateError> {
        let state = self.state.lock().unwrap();
        Ok(state.live_value(&canon(key)).map(|e| e.value.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool, SubstrateError> {
        let state = self.state.lock().unwrap();
        Ok(state.live_value(&canon(key)).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>, SubstrateError> {
        let prefix = canon(prefix);
        let state = self.state.lock().unwrap();
        Ok(state
            .under(&prefix)
            .into_iter()
            .filter_map(|key| {
                state.live_value(&key).map(|e| KeyValue { key: format!("/{key}"), value: e.value.clone() })
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), SubstrateError> {
        let key = canon(key);
        let mut state = self.state.lock().unwrap();
        let mut removed_any = false;
        for victim in state.under(&key) {
            if let Some(entry) = state.entries.remove(&victim) {
                let prev = entry.live().then_some(entry.value);
                state.record(self.history_capacity, ChangeAction::Delete, &victim, None, prev);
                removed_any = true;
            }
        }
        drop(state);
        if removed_any {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn head_index(&self) -> Result<u64, SubstrateError> { Ok(self.state.lock().unwrap().index) }

    async fn watch(&self, prefix: &str, after_index: u64, timeout: Duration)
        -> Result<WatchOutcome, SubstrateError>
    {
        let prefix = canon(prefix);
        let key_prefix = format!("/{prefix}/");
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register as a waiter before re-checking state, so a write
            // landing in between still wakes us.
            notified.as_mut().enable();
            {
                let state = self.state.lock().unwrap();
                if after_index + 1 < state.oldest_retained {
                    return Ok(WatchOutcome::HistoryGone { head: state.index });
                }
                if let Some(event) = state
                    .history
                    .iter()
                    .find(|e| e.modified_index > after_index && e.key.starts_with(&key_prefix))
                {
                    return Ok(WatchOutcome::Event(event.clone()));
                }
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(WatchOutcome::Timeout),
            }
        }
    }
}

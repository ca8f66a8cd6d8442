//! Per-device correlation store
//!
//! A bounded key/value map owned by a device session. Converters use it to
//! remember values across messages (mode flags, last action) and to
//! deduplicate retransmitted frames by transaction sequence number.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// How many transaction sequence numbers are remembered per key
pub const TRANSACTION_HISTORY: usize = 5;

/// Default number of entries before the oldest is evicted
pub const DEFAULT_CAPACITY: usize = 256;

/// Bounded store, last write wins
#[derive(Debug, Clone)]
pub struct DeviceStore {
    capacity: usize,
    values: HashMap<String, Value>,
    value_order: VecDeque<String>,
    transactions: HashMap<String, VecDeque<u8>>,
    transaction_order: VecDeque<String>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DeviceStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            values: HashMap::new(),
            value_order: VecDeque::new(),
            transactions: HashMap::new(),
            transaction_order: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Insert or replace a value, evicting the oldest key when full
    pub fn put(&mut self, key: &str, value: Value) {
        if self.values.insert(key.to_string(), value).is_none() {
            self.value_order.push_back(key.to_string());
            while self.value_order.len() > self.capacity {
                if let Some(oldest) = self.value_order.pop_front() {
                    self.values.remove(&oldest);
                }
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.value_order.retain(|k| k != key);
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Record a transaction sequence number for `key`.
    ///
    /// Returns `true` if it is among the last [`TRANSACTION_HISTORY`] numbers
    /// already seen for that key. Frames can arrive out of order, so more than
    /// the latest number is kept.
    pub fn has_already_processed(&mut self, key: &str, transaction: u8) -> bool {
        if let Some(history) = self.transactions.get_mut(key) {
            if history.contains(&transaction) {
                return true;
            }
            history.push_front(transaction);
            history.truncate(TRANSACTION_HISTORY);
            return false;
        }

        self.transactions
            .insert(key.to_string(), VecDeque::from([transaction]));
        self.transaction_order.push_back(key.to_string());
        while self.transaction_order.len() > self.capacity {
            if let Some(oldest) = self.transaction_order.pop_front() {
                self.transactions.remove(&oldest);
            }
        }
        false
    }
}

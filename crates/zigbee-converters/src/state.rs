//! Partial device state and merge precedence
//!
//! Every inbound converter that matches a message returns a partial state.
//! How overlapping fields are resolved is a per-definition [`MergePolicy`]
//! rather than an accident of registration order; conflicting values are
//! logged so catalog authors can spot converters fighting over a field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Device state keyed by exposed property
pub type State = Map<String, Value>;

/// Which converter wins when two decode the same field of one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The converter registered last wins
    #[default]
    LastWins,
    /// The converter registered first wins
    FirstWins,
}

impl std::str::FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_wins" => Ok(Self::LastWins),
            "first_wins" => Ok(Self::FirstWins),
            other => Err(format!("Unknown merge policy: {other}")),
        }
    }
}

/// Accumulates the partials produced for one message
pub struct PartialMerge {
    policy: MergePolicy,
    merged: State,
    owners: HashMap<String, String>,
    conflicts: usize,
}

impl PartialMerge {
    #[must_use]
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            merged: State::new(),
            owners: HashMap::new(),
            conflicts: 0,
        }
    }

    /// Fold one converter's output in
    pub fn add(&mut self, source: &str, partial: State) {
        for (key, value) in partial {
            match self.merged.get(&key) {
                None => {
                    self.owners.insert(key.clone(), source.to_string());
                    self.merged.insert(key, value);
                }
                Some(existing) => {
                    let owner = self.owners.get(&key).map_or("?", String::as_str);
                    if *existing != value {
                        self.conflicts += 1;
                        tracing::warn!(
                            "Converters {} and {} disagree on '{}' ({} vs {}), {:?} applies",
                            owner,
                            source,
                            key,
                            existing,
                            value,
                            self.policy
                        );
                    }
                    if self.policy == MergePolicy::LastWins {
                        self.owners.insert(key.clone(), source.to_string());
                        self.merged.insert(key, value);
                    }
                }
            }
        }
    }

    /// Number of conflicting values seen so far
    #[must_use]
    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    #[must_use]
    pub fn finish(self) -> State {
        self.merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn partial(value: Value) -> State {
        match value {
            Value::Object(map) => map,
            _ => State::new(),
        }
    }

    #[test]
    fn test_last_wins() {
        let mut merge = PartialMerge::new(MergePolicy::LastWins);
        merge.add("a", partial(json!({"temperature": 21.0, "battery": 90})));
        merge.add("b", partial(json!({"temperature": 21.5})));
        assert_eq!(merge.conflicts(), 1);
        let state = merge.finish();
        assert_eq!(state["temperature"], json!(21.5));
        assert_eq!(state["battery"], json!(90));
    }

    #[test]
    fn test_first_wins() {
        let mut merge = PartialMerge::new(MergePolicy::FirstWins);
        merge.add("a", partial(json!({"temperature": 21.0})));
        merge.add("b", partial(json!({"temperature": 21.5, "humidity": 40})));
        let state = merge.finish();
        assert_eq!(state["temperature"], json!(21.0));
        assert_eq!(state["humidity"], json!(40));
    }

    #[test]
    fn test_equal_values_are_not_conflicts() {
        let mut merge = PartialMerge::new(MergePolicy::LastWins);
        merge.add("a", partial(json!({"state": "ON"})));
        merge.add("b", partial(json!({"state": "ON"})));
        assert_eq!(merge.conflicts(), 0);
    }

    #[test]
    fn test_merge_policy_from_str() {
        assert_eq!("first_wins".parse::<MergePolicy>(), Ok(MergePolicy::FirstWins));
        assert!("random".parse::<MergePolicy>().is_err());
    }
}

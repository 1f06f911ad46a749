//! Dot-access variable store.
//!
//! Variables are a flat map from name to [`Value`] with two authored
//! conveniences on top:
//!
//! - Names may be written with a `$` prefix in authored source; internally
//!   the prefix is stripped.
//! - Dotted paths (`state.order.total`) assign through nested maps,
//!   auto-creating intermediate maps so LLM code may write into paths that
//!   do not exist yet.  Assigning through a non-map value is a readable
//!   error surfaced in the next prompt rather than a panic.
//!
//! Every write publishes a `VariableUpdate` event.

use std::collections::BTreeMap;

use playbooks_kernel::{Event, EventBus};

use crate::error::{Result, StateError};
use crate::value::Value;

/// Strip the authored `$` prefix, if present.
pub fn canonical_name(name: &str) -> &str {
    name.strip_prefix('$').unwrap_or(name)
}

/// Per-agent variable store.
#[derive(Debug)]
pub struct VariableStore {
    variables: BTreeMap<String, Value>,
    bus: EventBus,
    agent_id: String,
}

impl VariableStore {
    /// Create an empty store for `agent_id`.
    pub fn new(bus: EventBus, agent_id: impl Into<String>) -> Self {
        Self {
            variables: BTreeMap::new(),
            bus,
            agent_id: agent_id.into(),
        }
    }

    /// Assign `name = value`.  `$` prefixes are stripped.
    pub fn set(&mut self, name: &str, value: Value) {
        let name = canonical_name(name).to_string();
        self.bus.publish(Event::VariableUpdate {
            agent_id: self.agent_id.clone(),
            name: name.clone(),
            value: value.to_state_json(),
        });
        self.variables.insert(name, value);
    }

    /// Read a variable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(canonical_name(name))
    }

    /// Assign through a dotted path, auto-creating intermediate maps.
    ///
    /// `set_path(&["order", "total"], v)` ensures `order` is a map and sets
    /// its `total` key.
    ///
    /// # Errors
    ///
    /// [`StateError::PathCollision`] when a traversed segment holds a
    /// non-map value.
    pub fn set_path(&mut self, path: &[&str], value: Value) -> Result<()> {
        match path {
            [] => Ok(()),
            [name] => {
                self.set(name, value);
                Ok(())
            }
            [first, rest @ ..] => {
                let first = canonical_name(first).to_string();
                let full_path = path.join(".");

                let root = self
                    .variables
                    .entry(first.clone())
                    .or_insert_with(|| Value::Map(BTreeMap::new()));
                let found = root.type_name().to_string();
                let Value::Map(map) = root else {
                    return Err(StateError::PathCollision {
                        path: full_path,
                        segment: first,
                        found,
                    });
                };
                set_in_map(map, rest, value, &full_path)?;

                // Re-publish the root so observers see the nested write.
                let root_value = self.variables.get(&first).cloned().unwrap_or(Value::Null);
                self.bus.publish(Event::VariableUpdate {
                    agent_id: self.agent_id.clone(),
                    name: first,
                    value: root_value.to_state_json(),
                });
                Ok(())
            }
        }
    }

    /// Read through a dotted path.  Missing segments read as `None`
    /// (tolerating LLM code that inspects yet-unassigned paths).
    pub fn get_path(&self, path: &[&str]) -> Value {
        let mut current = match path.first().and_then(|name| self.get(name)) {
            Some(value) => value,
            None => return Value::Null,
        };
        for segment in &path[1..] {
            current = match current {
                Value::Map(map) => match map.get(*segment) {
                    Some(value) => value,
                    None => return Value::Null,
                },
                _ => return Value::Null,
            };
        }
        current.clone()
    }

    /// Remove a variable, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(canonical_name(name))
    }

    /// Whether `name` is assigned.
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(canonical_name(name))
    }

    /// All `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.variables.iter()
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Snapshot as JSON with authored `$` names, for state dicts.
    pub fn to_state_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.variables
                .iter()
                .map(|(name, value)| (format!("${name}"), value.to_state_json()))
                .collect(),
        )
    }
}

/// Descend into nested maps, creating intermediate maps as needed, and set
/// the leaf.
fn set_in_map(
    map: &mut BTreeMap<String, Value>,
    path: &[&str],
    value: Value,
    full_path: &str,
) -> Result<()> {
    match path {
        [] => Ok(()),
        [leaf] => {
            map.insert((*leaf).to_string(), value);
            Ok(())
        }
        [segment, rest @ ..] => {
            let entry = map
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            let found = entry.type_name().to_string();
            let Value::Map(inner) = entry else {
                return Err(StateError::PathCollision {
                    path: full_path.to_string(),
                    segment: (*segment).to_string(),
                    found,
                });
            };
            set_in_map(inner, rest, value, full_path)
        }
    }
}

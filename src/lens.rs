//! Lens accessors over the immutable state tree.

use crate::error::{Result, StoreError};
use crate::value::Value;
use std::sync::Arc;

/// A get/set pair for a fixed location in a nested [`Value`] tree.
///
/// Reads resolve nested map keys and numeric list indices. Writes rebuild
/// every node on the path with a new reference while untouched sibling
/// subtrees keep their identity.
///
/// There is no auto-vivification: `set` through a missing or non-container
/// intermediate fails with [`StoreError::PathUnreachable`]. The leaf key
/// itself may be freshly created in an existing map.
#[derive(Clone, Debug)]
pub struct Lens {
    keys: Vec<String>,
    default: Option<Value>,
}

impl Lens {
    /// Lens over the given key path.
    pub fn new<K, I>(keys: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        Lens {
            keys: keys.into_iter().map(Into::into).collect(),
            default: None,
        }
    }

    /// Lens with a default returned when the resolved value is null or the
    /// path is absent. Falsy-but-present values (0, false, "", empty
    /// containers) are returned as-is, never replaced by the default.
    pub fn with_default<K, I>(keys: I, default: Value) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        Lens {
            keys: keys.into_iter().map(Into::into).collect(),
            default: Some(default),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Resolve the targeted value. An empty key path returns the whole state.
    pub fn get(&self, state: &Value) -> Value {
        let mut node = state;
        for key in &self.keys {
            let next = match node {
                Value::Map(entries) => entries.get(key.as_str()),
                Value::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(child) => node = child,
                None => return self.default_value(),
            }
        }
        if node.is_null() {
            self.default_value()
        } else {
            node.clone()
        }
    }

    /// Return a new root with `value` at the targeted location.
    ///
    /// Every ancestor on the path is a new reference; siblings keep identity.
    /// An empty key path replaces the root.
    pub fn set(&self, state: &Value, value: Value) -> Result<Value> {
        if self.keys.is_empty() {
            return Ok(value);
        }
        set_in(state, &self.keys, value)
    }

    /// Return a new root with the targeted key removed.
    ///
    /// Ancestors on the path get new references. If the path is unreachable
    /// or the leaf is already absent, the state is returned unchanged.
    pub fn unset(&self, state: &Value) -> Value {
        if self.keys.is_empty() {
            return state.clone();
        }
        unset_in(state, &self.keys).unwrap_or_else(|| state.clone())
    }

    fn default_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

fn set_in(node: &Value, keys: &[String], value: Value) -> Result<Value> {
    let (head, rest) = keys.split_first().expect("set_in requires a non-empty path");
    match node {
        Value::Map(entries) => {
            let new_child = if rest.is_empty() {
                value
            } else {
                let child = entries.get(head.as_str()).ok_or_else(|| {
                    StoreError::PathUnreachable {
                        segment: head.clone(),
                        reason: "missing intermediate key".to_string(),
                    }
                })?;
                set_in(child, rest, value)?
            };
            let mut next = (**entries).clone();
            next.insert(head.clone(), new_child);
            Ok(Value::Map(Arc::new(next)))
        }
        Value::List(items) => {
            let index = head
                .parse::<usize>()
                .map_err(|_| StoreError::PathUnreachable {
                    segment: head.clone(),
                    reason: "list segment must be a numeric index".to_string(),
                })?;
            if index >= items.len() {
                return Err(StoreError::PathUnreachable {
                    segment: head.clone(),
                    reason: format!("index {} out of bounds (len {})", index, items.len()),
                });
            }
            let new_child = if rest.is_empty() {
                value
            } else {
                set_in(&items[index], rest, value)?
            };
            let mut next = (**items).clone();
            next[index] = new_child;
            Ok(Value::List(Arc::new(next)))
        }
        _ => Err(StoreError::PathUnreachable {
            segment: head.clone(),
            reason: "not a container".to_string(),
        }),
    }
}

fn unset_in(node: &Value, keys: &[String]) -> Option<Value> {
    let (head, rest) = keys.split_first()?;
    match node {
        Value::Map(entries) => {
            if rest.is_empty() {
                if !entries.contains_key(head.as_str()) {
                    return None;
                }
                let mut next = (**entries).clone();
                next.remove(head.as_str());
                Some(Value::Map(Arc::new(next)))
            } else {
                let child = entries.get(head.as_str())?;
                let new_child = unset_in(child, rest)?;
                let mut next = (**entries).clone();
                next.insert(head.clone(), new_child);
                Some(Value::Map(Arc::new(next)))
            }
        }
        Value::List(items) => {
            let index = head.parse::<usize>().ok()?;
            if index >= items.len() {
                return None;
            }
            let mut next = (**items).clone();
            if rest.is_empty() {
                next.remove(index);
            } else {
                next[index] = unset_in(&items[index], rest)?;
            }
            Some(Value::List(Arc::new(next)))
        }
        _ => None,
    }
}

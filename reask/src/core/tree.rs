//! Validated document tree.
//!
//! Every position holds either a plain value or an unresolved failure, so the
//! reask assembler and final output assembly never have to guess whether a
//! leaf is data or a placeholder.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::core::path::JsonPath;
use crate::core::types::FailResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReAskKind {
    /// One field failed validation.
    Field,
    /// The whole output could not be parsed.
    Skeleton,
}

/// A location that must be regenerated by the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReAsk {
    pub kind: ReAskKind,
    pub path: JsonPath,
    pub incorrect_value: Option<Value>,
    /// Every failure at this node, in validator order.
    pub fail_results: Vec<FailResult>,
}

impl ReAsk {
    pub fn messages(&self) -> Vec<&str> {
        self.fail_results
            .iter()
            .map(|fail| fail.error_message.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validated {
    Value(Value),
    /// Fields in schema order; filtered or absent fields are omitted.
    Object(Vec<(String, Validated)>),
    List(Vec<Validated>),
    ReAsk(ReAsk),
    /// A `refrain` validator suppressed this node and with it the whole output.
    Refrained,
}

impl Validated {
    /// Reasks in depth-first, left-to-right order.
    pub fn reasks(&self) -> Vec<&ReAsk> {
        let mut out = Vec::new();
        self.collect_reasks(&mut out);
        out
    }

    fn collect_reasks<'a>(&'a self, out: &mut Vec<&'a ReAsk>) {
        match self {
            Validated::ReAsk(reask) => out.push(reask),
            Validated::Object(entries) => {
                for (_, child) in entries {
                    child.collect_reasks(out);
                }
            }
            Validated::List(items) => {
                for item in items {
                    item.collect_reasks(out);
                }
            }
            Validated::Value(_) | Validated::Refrained => {}
        }
    }

    pub fn has_reasks(&self) -> bool {
        !self.reasks().is_empty()
    }

    pub fn is_refrained(&self) -> bool {
        match self {
            Validated::Refrained => true,
            Validated::Object(entries) => entries.iter().any(|(_, child)| child.is_refrained()),
            Validated::List(items) => items.iter().any(Validated::is_refrained),
            Validated::Value(_) | Validated::ReAsk(_) => false,
        }
    }

    /// Plain JSON view; unresolved fields show their incorrect value.
    pub fn to_value(&self) -> Value {
        match self {
            Validated::Value(value) => value.clone(),
            Validated::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(name, child)| (name.clone(), child.to_value()))
                    .collect::<Map<_, _>>(),
            ),
            Validated::List(items) => Value::Array(items.iter().map(Validated::to_value).collect()),
            Validated::ReAsk(reask) => reask.incorrect_value.clone().unwrap_or(Value::Null),
            Validated::Refrained => Value::Null,
        }
    }

    /// Final caller-facing output: `None` when anything refrained or nothing parsed.
    pub fn output(&self) -> Option<Value> {
        if self.is_refrained() {
            return None;
        }
        if let Validated::ReAsk(reask) = self
            && reask.kind == ReAskKind::Skeleton
        {
            return None;
        }
        Some(self.to_value())
    }

    /// JSON view that marks unresolved fields explicitly (used for logs).
    pub fn to_annotated_value(&self) -> Value {
        match self {
            Validated::Value(value) => value.clone(),
            Validated::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(name, child)| (name.clone(), child.to_annotated_value()))
                    .collect::<Map<_, _>>(),
            ),
            Validated::List(items) => {
                Value::Array(items.iter().map(Validated::to_annotated_value).collect())
            }
            Validated::ReAsk(reask) => json!({ "$reask": reask }),
            Validated::Refrained => json!({ "$refrained": true }),
        }
    }

    /// Replace (or, with `None`, remove) the unresolved entry recorded at `path`.
    ///
    /// Entries are found by the path on their `ReAsk`, not by position, since
    /// filtered list elements shift the positions of later siblings. Returns
    /// `false` when no such entry exists in this tree.
    pub fn splice(&mut self, path: &JsonPath, replacement: Option<Validated>) -> bool {
        let mut trail = Vec::new();
        if !self.locate(path, &mut trail) {
            return false;
        }
        let Some((last, parents)) = trail.split_last() else {
            return match replacement {
                Some(root) => {
                    *self = root;
                    true
                }
                None => false,
            };
        };
        let mut node = self;
        for &position in parents {
            let Some(child) = node.child_mut(position) else {
                return false;
            };
            node = child;
        }
        let last = *last;
        match (node, replacement) {
            (Validated::Object(entries), Some(value)) if last < entries.len() => {
                entries[last].1 = value;
            }
            (Validated::Object(entries), None) if last < entries.len() => {
                entries.remove(last);
            }
            (Validated::List(items), Some(value)) if last < items.len() => items[last] = value,
            (Validated::List(items), None) if last < items.len() => {
                items.remove(last);
            }
            _ => return false,
        }
        true
    }

    /// Child positions leading to the `ReAsk` recorded at `path`.
    fn locate(&self, path: &JsonPath, trail: &mut Vec<usize>) -> bool {
        let children: Vec<&Validated> = match self {
            Validated::ReAsk(reask) => return reask.path == *path,
            Validated::Object(entries) => entries.iter().map(|(_, child)| child).collect(),
            Validated::List(items) => items.iter().collect(),
            Validated::Value(_) | Validated::Refrained => return false,
        };
        for (position, child) in children.into_iter().enumerate() {
            trail.push(position);
            if child.locate(path, trail) {
                return true;
            }
            trail.pop();
        }
        false
    }

    fn child_mut(&mut self, position: usize) -> Option<&mut Validated> {
        match self {
            Validated::Object(entries) => entries.get_mut(position).map(|(_, child)| child),
            Validated::List(items) => items.get_mut(position),
            Validated::Value(_) | Validated::ReAsk(_) | Validated::Refrained => None,
        }
    }
}

impl Serialize for Validated {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_annotated_value().serialize(serializer)
    }
}

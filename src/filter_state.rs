//! A small typed key/value store attached to a connection, request, or
//! filter-chain invocation, used by filters to pass data to one another
//! without the router needing to know about every filter's internal state.

use std::any::Any;
use std::collections::HashMap;

/// How long a stored value lives before it's dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifeSpan {
    /// Cleared when the current filter chain invocation (one request)
    /// finishes.
    FilterChain,
    /// Cleared when the request (including any retries) completes.
    Request,
    /// Lives for the whole connection, across every request on it.
    Connection,
}

/// A filter-state tree node. Lookup walks up through `parent` on a miss, so
/// a connection-scoped value set once is visible to every request's
/// filter-chain-scoped lookups without copying it down.
pub struct FilterState {
    life_span: LifeSpan,
    values: HashMap<String, Box<dyn Any + Send>>,
    parent: Option<Box<FilterState>>,
}

impl FilterState {
    /// Creates a new root node at the given life span, with no parent.
    pub fn new(life_span: LifeSpan) -> Self {
        FilterState {
            life_span,
            values: HashMap::new(),
            parent: None,
        }
    }

    /// Creates a child node, delegating lookup misses to `parent`.
    pub fn with_parent(life_span: LifeSpan, parent: FilterState) -> Self {
        FilterState {
            life_span,
            values: HashMap::new(),
            parent: Some(Box::new(parent)),
        }
    }

    /// This node's life span.
    pub fn life_span(&self) -> LifeSpan {
        self.life_span
    }

    /// Stores a value under `key` at this node.
    pub fn set<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Looks up `key`, checking this node then delegating to the parent on a miss.
    pub fn get<T: Any + Send>(&self, key: &str) -> Option<&T> {
        self.values
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .or_else(|| self.parent.as_ref().and_then(|p| p.get::<T>(key)))
    }

    /// Whether `key` is set at this node or any ancestor.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
            || self.parent.as_ref().map(|p| p.contains(key)).unwrap_or(false)
    }
}

//! Status dictionaries
//!
//! Structured key-value maps used by the kernel, nodes and synapses for
//! `get_status` / `set_status`. Reads are tracked so the gateway can detect
//! keys that were supplied but never consumed.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single status value
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StatusValue {
    /// Floating-point value (milliseconds, weights, potentials)
    Double(f64),
    /// Integer value (counts, seeds)
    Integer(i64),
    /// Boolean flag
    Bool(bool),
    /// Text value (model names)
    Text(String),
    /// List of floating-point values
    DoubleList(Vec<f64>),
    /// List of integer values
    IntList(Vec<i64>),
}

impl From<f64> for StatusValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<i64> for StatusValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for StatusValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for StatusValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for StatusValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<f64>> for StatusValue {
    fn from(v: Vec<f64>) -> Self {
        Self::DoubleList(v)
    }
}

impl From<Vec<i64>> for StatusValue {
    fn from(v: Vec<i64>) -> Self {
        Self::IntList(v)
    }
}

/// Ordered status dictionary with read tracking
#[derive(Debug, Clone, Default)]
pub struct StatusDict {
    entries: BTreeMap<String, StatusValue>,
    accessed: RefCell<BTreeSet<String>>,
}

impl StatusDict {
    /// Create an empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value under a key, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<StatusValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Check whether a key is present without marking it accessed
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw value lookup, marking the key as accessed
    pub fn get(&self, key: &str) -> Option<&StatusValue> {
        let value = self.entries.get(key);
        if value.is_some() {
            self.accessed.borrow_mut().insert(key.to_string());
        }
        value
    }

    /// Read a floating-point value; integers widen
    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            StatusValue::Double(v) => Some(*v),
            StatusValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Read an integer value
    pub fn get_integer(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            StatusValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Read a boolean value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            StatusValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Read a text value
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            StatusValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Read a list of floating-point values; integer lists widen
    pub fn get_double_list(&self, key: &str) -> Option<Vec<f64>> {
        match self.get(key)? {
            StatusValue::DoubleList(v) => Some(v.clone()),
            StatusValue::IntList(v) => Some(v.iter().map(|&x| x as f64).collect()),
            _ => None,
        }
    }

    /// Read a list of integer values
    pub fn get_int_list(&self, key: &str) -> Option<Vec<i64>> {
        match self.get(key)? {
            StatusValue::IntList(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Mark a key as accessed without reading it
    pub fn mark_accessed(&self, key: &str) {
        if self.entries.contains_key(key) {
            self.accessed.borrow_mut().insert(key.to_string());
        }
    }

    /// Keys that are present but were never read
    pub fn unaccessed(&self) -> Vec<String> {
        let accessed = self.accessed.borrow();
        self.entries
            .keys()
            .filter(|k| !accessed.contains(*k))
            .cloned()
            .collect()
    }

    /// Reset access tracking
    pub fn clear_access_flags(&self) {
        self.accessed.borrow_mut().clear();
    }

    /// Merge another dictionary over this one, replacing shared keys
    pub fn merge_from(&mut self, other: &StatusDict) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_read() {
        let mut d = StatusDict::new();
        d.insert("resolution", 0.1);
        d.insert("local_num_threads", 2i64);
        d.insert("print_time", true);
        d.insert("model", "iaf_neuron");

        assert_eq!(d.get_double("resolution"), Some(0.1));
        assert_eq!(d.get_integer("local_num_threads"), Some(2));
        assert_eq!(d.get_bool("print_time"), Some(true));
        assert_eq!(d.get_text("model"), Some("iaf_neuron"));
        assert_eq!(d.get_double("missing"), None);
    }

    #[test]
    fn test_integer_widening() {
        let mut d = StatusDict::new();
        d.insert("delay", 2i64);
        assert_eq!(d.get_double("delay"), Some(2.0));
    }

    #[test]
    fn test_access_tracking() {
        let mut d = StatusDict::new();
        d.insert("read", 1.0);
        d.insert("unread", 2.0);

        assert_eq!(d.get_double("read"), Some(1.0));
        assert_eq!(d.unaccessed(), vec!["unread".to_string()]);

        d.mark_accessed("unread");
        assert!(d.unaccessed().is_empty());
    }

    #[test]
    fn test_merge() {
        let mut base = StatusDict::new();
        base.insert("a", 1.0);
        base.insert("b", 2.0);

        let mut over = StatusDict::new();
        over.insert("b", 3.0);
        over.insert("c", 4.0);

        base.merge_from(&over);
        assert_eq!(base.get_double("b"), Some(3.0));
        assert_eq!(base.get_double("c"), Some(4.0));
        assert_eq!(base.len(), 3);
    }

    #[test]
    fn test_lists() {
        let mut d = StatusDict::new();
        d.insert("rng_seeds", vec![1i64, 2, 3]);
        d.insert("spike_times", vec![1.0, 2.5]);

        assert_eq!(d.get_int_list("rng_seeds"), Some(vec![1, 2, 3]));
        assert_eq!(d.get_double_list("spike_times"), Some(vec![1.0, 2.5]));
        // integer lists widen to double lists
        assert_eq!(d.get_double_list("rng_seeds"), Some(vec![1.0, 2.0, 3.0]));
    }
}

//! Configuration tree nodes
//!
//! [`ConfigNode`] is the datastore's element model: a named element with an
//! optional namespace, optional text content, and ordered children.

use crate::path::Segment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Element of a configuration tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigNode {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<ConfigNode>,
}

impl ConfigNode {
    /// Create an unqualified element
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            text: None,
            children: Vec::new(),
        }
    }

    /// Create a namespace-qualified element
    #[inline]
    #[must_use]
    pub fn qualified(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::new(name)
        }
    }

    /// Create a leaf with text content
    #[inline]
    #[must_use]
    pub fn leaf(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).with_text(text)
    }

    /// Set text content
    #[inline]
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Append a child element
    #[inline]
    #[must_use]
    pub fn with_child(mut self, child: ConfigNode) -> Self {
        self.children.push(child);
        self
    }

    /// Append a leaf child
    #[inline]
    #[must_use]
    pub fn with_text_child(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.with_child(Self::leaf(name, text))
    }

    /// Append an empty child (presence container or empty leaf)
    #[inline]
    #[must_use]
    pub fn with_empty_child(self, name: impl Into<String>) -> Self {
        self.with_child(Self::new(name))
    }

    /// Append a child in place
    #[inline]
    pub fn push_child(&mut self, child: ConfigNode) {
        self.children.push(child);
    }

    /// Element name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element namespace, if qualified
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Text content
    #[inline]
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Child elements in document order
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[ConfigNode] {
        &self.children
    }

    /// Whether the element has neither text nor children
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.children.is_empty()
    }

    /// First child with the given name
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&ConfigNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Whether a child with the given name exists
    #[inline]
    #[must_use]
    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    /// Text of the first child with the given name
    #[must_use]
    pub fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(ConfigNode::text)
    }

    /// All children with the given name
    pub fn children_named<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a ConfigNode> + 'n
    where
        'a: 'n,
    {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// All descendants reached by a `/`-separated element path
    ///
    /// `group.find("sensor-paths/sensor-path/telemetry-sensor-path")` yields
    /// every `telemetry-sensor-path` leaf below `group`.
    #[must_use]
    pub fn find<'a>(&'a self, path: &str) -> Vec<&'a ConfigNode> {
        let mut current = vec![self];
        for step in path.split('/').filter(|s| !s.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|node| node.children.iter().filter(move |c| c.name == step))
                .collect();
        }
        current
    }

    /// Whether this element is the one a path segment selects
    #[must_use]
    pub fn matches_segment(&self, segment: &Segment) -> bool {
        if self.name != segment.name() {
            return false;
        }
        match segment.key() {
            Some((key, value)) => self.text_of(key) == Some(value),
            None => true,
        }
    }

    /// Index of the child a segment selects
    #[must_use]
    pub fn position_of(&self, segment: &Segment) -> Option<usize> {
        self.children.iter().position(|c| c.matches_segment(segment))
    }

    /// Mutable access to children
    #[inline]
    pub fn children_mut(&mut self) -> &mut Vec<ConfigNode> {
        &mut self.children
    }

    /// Merge another element into this one
    ///
    /// Text is overwritten when `other` carries text. Children are matched by
    /// name, and entries of lists known to `keys` additionally by their key
    /// leaf; matched children merge recursively, unmatched ones are appended.
    pub fn merge_from(&mut self, other: &ConfigNode, keys: &ListKeys) {
        if other.text.is_some() {
            self.text.clone_from(&other.text);
        }
        for incoming in &other.children {
            match self
                .children
                .iter_mut()
                .find(|c| keys.same_entry(c, incoming))
            {
                Some(existing) => existing.merge_from(incoming, keys),
                None => self.children.push(incoming.clone()),
            }
        }
    }
}

/// Key leaf names of list elements
///
/// The datastore has no schema; this table is the minimum it needs to tell
/// two entries of the same list apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListKeys {
    keys: HashMap<String, String>,
}

impl ListKeys {
    /// Empty table; every element is matched by name only
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the key leaf of a list element
    #[inline]
    #[must_use]
    pub fn with_list(mut self, list: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(list.into(), key.into());
        self
    }

    /// Key leaf of a list element, if known
    #[inline]
    #[must_use]
    pub fn key_of(&self, list: &str) -> Option<&str> {
        self.keys.get(list).map(String::as_str)
    }

    /// Whether two elements denote the same container, leaf or list entry
    #[must_use]
    pub fn same_entry(&self, a: &ConfigNode, b: &ConfigNode) -> bool {
        if a.name != b.name {
            return false;
        }
        match self.key_of(&a.name) {
            Some(key) => a.text_of(key) == b.text_of(key),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn group(id: &str, paths: &[&str]) -> ConfigNode {
        let mut sensor_paths = ConfigNode::new("sensor-paths");
        for p in paths {
            sensor_paths.push_child(
                ConfigNode::new("sensor-path").with_text_child("telemetry-sensor-path", *p),
            );
        }
        ConfigNode::new("sensor-group")
            .with_text_child("sensor-group-identifier", id)
            .with_child(sensor_paths)
    }

    #[test]
    fn builder_and_accessors() {
        let node = ConfigNode::qualified("urn:ems", "grpc")
            .with_text_child("port", "57400")
            .with_empty_child("enable");

        assert_eq!(node.name(), "grpc");
        assert_eq!(node.namespace(), Some("urn:ems"));
        assert_eq!(node.text_of("port"), Some("57400"));
        assert!(node.has_child("enable"));
        assert!(node.child("enable").unwrap().is_empty());
        assert!(!node.has_child("address-family"));
    }

    #[test]
    fn find_descends_all_matches() {
        let g = group("grp1", &["a/b", "c/d"]);
        let found: Vec<_> = g
            .find("sensor-paths/sensor-path/telemetry-sensor-path")
            .into_iter()
            .filter_map(ConfigNode::text)
            .collect();
        assert_eq!(found, vec!["a/b", "c/d"]);
    }

    #[test]
    fn found_nodes_outlive_the_path_string() {
        let g = group("grp1", &["a/b"]);
        let found = {
            let path = String::from("sensor-paths/sensor-path");
            g.find(&path)
        };
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text_of("telemetry-sensor-path"), Some("a/b"));

        let names: Vec<&ConfigNode> = {
            let name = String::from("sensor-paths");
            g.children_named(&name).collect()
        };
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn segment_matching_uses_key_leaf() {
        let g = group("grp1", &[]);
        assert!(g.matches_segment(&Segment::element("sensor-group")));
        assert!(g.matches_segment(&Segment::entry(
            "sensor-group",
            "sensor-group-identifier",
            "grp1"
        )));
        assert!(!g.matches_segment(&Segment::entry(
            "sensor-group",
            "sensor-group-identifier",
            "grp2"
        )));
    }

    #[test]
    fn merge_adds_presence_leaf() {
        let mut running = ConfigNode::qualified("urn:ems", "grpc").with_text_child("port", "57400");
        running.merge_from(
            &ConfigNode::qualified("urn:ems", "grpc").with_empty_child("enable"),
            &ListKeys::new(),
        );

        assert!(running.has_child("enable"));
        assert_eq!(running.text_of("port"), Some("57400"));
    }

    fn keys() -> ListKeys {
        ListKeys::new()
            .with_list("sensor-group", "sensor-group-identifier")
            .with_list("sensor-path", "telemetry-sensor-path")
    }

    #[test]
    fn merge_keeps_distinct_list_entries() {
        let mut groups = ConfigNode::new("sensor-groups").with_child(group("grp1", &["a"]));
        groups.merge_from(
            &ConfigNode::new("sensor-groups").with_child(group("grp2", &["b"])),
            &keys(),
        );

        assert_eq!(groups.children_named("sensor-group").count(), 2);
    }

    #[test]
    fn merge_combines_same_list_entry() {
        let mut groups = ConfigNode::new("sensor-groups").with_child(group("grp1", &["a"]));
        groups.merge_from(
            &ConfigNode::new("sensor-groups").with_child(group("grp1", &["a", "b"])),
            &keys(),
        );

        assert_eq!(groups.children_named("sensor-group").count(), 1);
        let paths: Vec<_> = groups
            .find("sensor-group/sensor-paths/sensor-path/telemetry-sensor-path")
            .into_iter()
            .filter_map(ConfigNode::text)
            .collect();
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn merge_without_keys_collapses_entries() {
        let mut groups = ConfigNode::new("sensor-groups").with_child(group("grp1", &["a"]));
        groups.merge_from(
            &ConfigNode::new("sensor-groups").with_child(group("grp2", &[])),
            &ListKeys::new(),
        );

        assert_eq!(groups.children_named("sensor-group").count(), 1);
        assert_eq!(
            groups.child("sensor-group").unwrap().text_of("sensor-group-identifier"),
            Some("grp2")
        );
    }

    #[test]
    fn serializes_without_empty_fields() {
        let node = ConfigNode::new("enable");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "enable" }));
    }
}

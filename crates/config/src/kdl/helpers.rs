//! Shared helpers for walking KDL nodes.
//!
//! Scalar settings may be written either as properties (`staging=#true`) or
//! as child nodes with a single argument (`staging #true`); both forms are
//! accepted, child-node form winning the documentation examples.

use kdl::KdlNode;

/// Find a child node by name
pub fn get_child<'a>(node: &'a KdlNode, key: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|n| n.name().value() == key)
}

/// Get a named string setting from a node, e.g. `address "0.0.0.0:443"`
pub fn get_string_entry(node: &KdlNode, key: &str) -> Option<String> {
    if let Some(value) = node.entry(key).and_then(|e| e.value().as_string()) {
        return Some(value.to_string());
    }
    get_child(node, key).and_then(get_first_arg_string)
}

/// Get a named boolean setting from a node, e.g. `staging #true`
pub fn get_bool_entry(node: &KdlNode, key: &str) -> Option<bool> {
    if let Some(value) = node.entry(key).and_then(|e| e.value().as_bool()) {
        return Some(value);
    }
    get_child(node, key)?
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

/// Get the first positional string argument of a node,
/// e.g. the `"web"` in `listener "web" { ... }`
pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
}

/// Collect every positional string argument of a node,
/// e.g. the hosts in `acme-hosts "a.com" "b.com"`
pub fn get_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(str::to_string)
        .collect()
}

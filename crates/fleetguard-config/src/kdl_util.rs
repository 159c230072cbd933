//! Small helpers over the `kdl` document tree; kept separate from
//! `controller.rs` since every field getter needs the same
//! argument/property lookup dance.

use kdl::{KdlDocument, KdlNode, KdlValue};

use crate::{ConfigError, ConfigResult};

pub fn child<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlNode> {
    doc.nodes().iter().find(|n| n.name().value() == name)
}

pub fn children_named<'a>(doc: &'a KdlDocument, name: &str) -> Vec<&'a KdlNode> {
    doc.nodes()
        .iter()
        .filter(|n| n.name().value() == name)
        .collect()
}

fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries().iter().find(|e| e.name().is_none()).map(|e| e.value())
}

pub fn arg_str(node: &KdlNode, field: &str) -> ConfigResult<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| ConfigError::invalid(field, "expected a string argument"))
}

pub fn arg_f64(node: &KdlNode, field: &str) -> ConfigResult<f64> {
    first_arg(node)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .ok_or_else(|| ConfigError::invalid(field, "expected a numeric argument"))
}

pub fn arg_u64(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    first_arg(node)
        .and_then(|v| v.as_integer())
        .map(|i| i as u64)
        .ok_or_else(|| ConfigError::invalid(field, "expected an integer argument"))
}

pub fn arg_u32(node: &KdlNode, field: &str) -> ConfigResult<u32> {
    arg_u64(node, field).map(|v| v as u32)
}

pub fn arg_bool(node: &KdlNode, field: &str) -> ConfigResult<bool> {
    first_arg(node)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| ConfigError::invalid(field, "expected a boolean argument"))
}

/// Looks up a property (`key=value` style entry) on `node`, e.g. the
/// `"L4"=0.60` style keyed rate in `price-table { gpu-hour "L4" 0.60 }`
/// where the key is instead the first positional argument and the value the
/// second — used by `gpu-hour`.
pub fn positional_str_then_f64(node: &KdlNode, field: &str) -> ConfigResult<(String, f64)> {
    let mut positional = node.entries().iter().filter(|e| e.name().is_none());
    let key = positional
        .next()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| ConfigError::invalid(field, "expected a string key as first argument"))?
        .to_string();
    let value = positional
        .next()
        .and_then(|e| e.value().as_float().or_else(|| e.value().as_integer().map(|i| i as f64)))
        .ok_or_else(|| ConfigError::invalid(field, "expected a numeric rate as second argument"))?;
    Ok((key, value))
}

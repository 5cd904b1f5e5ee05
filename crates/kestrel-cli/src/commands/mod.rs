//! Subcommand implementations and shared input handling

pub mod analyze;
pub mod cfg;
pub mod disasm;
pub mod encode;
pub mod graph;
pub mod run;

use anyhow::{anyhow, Context};
use kestrel_bytecode::unit::MAGIC;
use kestrel_bytecode::{BytecodeUnit, Kind};
use kestrel_engine::Value;
use std::path::Path;

/// Argument kind given on the command line; `any` leaves it unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindArg(pub Option<Kind>);

pub fn parse_kind(text: &str) -> Result<KindArg, String> {
    if text == "any" {
        return Ok(KindArg(None));
    }
    Kind::ALL
        .iter()
        .find(|kind| kind.name() == text)
        .map(|&kind| KindArg(Some(kind)))
        .ok_or_else(|| {
            let names: Vec<&str> = Kind::ALL.iter().map(|kind| kind.name()).collect();
            format!("unknown kind `{}` (expected any, {})", text, names.join(", "))
        })
}

pub fn kinds(args: &[KindArg]) -> Vec<Option<Kind>> {
    args.iter().map(|arg| arg.0).collect()
}

/// Load a unit from its binary encoding or its JSON description
pub fn load_unit(path: &Path) -> anyhow::Result<BytecodeUnit> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let unit = if data.starts_with(&MAGIC) {
        BytecodeUnit::decode(&data)
    } else {
        let text = std::str::from_utf8(&data)
            .map_err(|_| anyhow!("{} is neither a Kestrel unit nor UTF-8 JSON", path.display()))?;
        BytecodeUnit::from_json(text)
    };
    let unit = unit.with_context(|| format!("Failed to load {}", path.display()))?;
    tracing::debug!(unit = unit.name(), instructions = unit.len(), "loaded unit");
    Ok(unit)
}

/// Parse a command-line argument as a JSON literal, falling back to a string
pub fn parse_value(text: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(json) => from_json(json),
        Err(_) => Value::str(text),
    }
}

fn from_json(json: serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::str(&s),
        Json::Array(items) => Value::list(items.into_iter().map(from_json).collect()),
        Json::Object(map) => Value::dict(
            map.into_iter()
                .map(|(key, value)| (Value::str(&key), from_json(value)))
                .collect(),
        ),
    }
}

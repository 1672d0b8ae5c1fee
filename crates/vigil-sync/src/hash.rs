//! Content hashing for plan definitions.
//!
//! The digest covers the migrated definition serialised with object keys
//! sorted at every level, so field order in the source file never changes it.

use std::path::Path;

use serde_json::Value;

use vigil_plan::{load_plan_file, PlanDefinition};
use vigil_types::{Result, VigilError};

pub const HASH_PREFIX: &str = "blake3:";

/// Serialise `value` as compact JSON with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// `blake3:<hex>` digest of the canonical form of `definition`.
pub fn content_hash(definition: &Value) -> String {
    let digest = blake3::hash(canonical_json(definition).as_bytes());
    format!("{HASH_PREFIX}{}", hex::encode(digest.as_bytes()))
}

/// Load one export of a plan file under `root` and hash it.
pub async fn hash_export(
    root: &Path,
    local_path: &str,
    export_name: &str,
) -> Result<(PlanDefinition, String)> {
    let mut defs = load_plan_file(&root.join(local_path)).await?;
    let index = defs
        .iter()
        .position(|d| d.export_name == export_name)
        .ok_or_else(|| VigilError::NotFound {
            kind: "export".into(),
            id: format!("{local_path}#{export_name}"),
        })?;
    let mut def = defs.swap_remove(index);
    def.local_path = local_path.to_string();
    let hash = content_hash(&def.raw);
    Ok((def, hash))
}

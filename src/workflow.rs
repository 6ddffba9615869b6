use std::fs;

use camino::Utf8Path;
use serde_json::{Map, Value};

use crate::error::ProvisionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    MpsToCuda,
    Fp32ToFp16,
    EagerToSdpa,
}

/// One value substitution and the named input it applies to in API-format
/// workflows.
#[derive(Debug, Clone, Copy)]
pub struct Substitution {
    pub input: &'static str,
    pub from: &'static str,
    pub to: &'static str,
    pub rewrite: Rewrite,
}

pub const SUBSTITUTIONS: [Substitution; 3] = [
    Substitution {
        input: "device",
        from: "mps",
        to: "cuda",
        rewrite: Rewrite::MpsToCuda,
    },
    Substitution {
        input: "precision",
        from: "fp32",
        to: "fp16",
        rewrite: Rewrite::Fp32ToFp16,
    },
    Substitution {
        input: "attention",
        from: "eager",
        to: "sdpa",
        rewrite: Rewrite::EagerToSdpa,
    },
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchCounts {
    pub mps_to_cuda: usize,
    pub fp32_to_fp16: usize,
    pub eager_to_sdpa: usize,
}

impl PatchCounts {
    pub fn total(&self) -> usize {
        self.mps_to_cuda + self.fp32_to_fp16 + self.eager_to_sdpa
    }

    fn record(&mut self, rewrite: Rewrite) {
        match rewrite {
            Rewrite::MpsToCuda => self.mps_to_cuda += 1,
            Rewrite::Fp32ToFp16 => self.fp32_to_fp16 += 1,
            Rewrite::EagerToSdpa => self.eager_to_sdpa += 1,
        }
    }
}

/// A ComfyUI workflow in either of its two on-disk shapes. The shape is
/// decided once, when the document is loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowDocument {
    /// UI format: `{"nodes": [...]}` (or a bare array); each node may carry a
    /// positional `widgets_values` list.
    List(Value),
    /// API format: `{"<id>": {"inputs": {...}}, ...}`.
    Map(Value),
}

impl WorkflowDocument {
    pub fn from_value(value: Value) -> Result<Self, ProvisionError> {
        match &value {
            Value::Array(_) => Ok(Self::List(value)),
            Value::Object(map) => match map.get("nodes") {
                Some(Value::Array(_)) => Ok(Self::List(value)),
                _ => Ok(Self::Map(value)),
            },
            other => Err(ProvisionError::UnsupportedWorkflow(format!(
                "expected a JSON object or array, found {}",
                json_kind(other)
            ))),
        }
    }

    pub fn parse(content: &str) -> Result<Self, ProvisionError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|err| ProvisionError::WorkflowParse(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, ProvisionError> {
        if !path.as_std_path().exists() {
            return Err(ProvisionError::MissingInput(path.as_std_path().to_path_buf()));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| ProvisionError::Filesystem(format!("read {path}: {err}")))?;
        Self::parse(&content)
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), ProvisionError> {
        let mut content = serde_json::to_string_pretty(self.as_value())
            .map_err(|err| ProvisionError::WorkflowParse(err.to_string()))?;
        content.push('\n');
        fs::write(path.as_std_path(), content)
            .map_err(|err| ProvisionError::Filesystem(format!("write {path}: {err}")))
    }

    pub fn as_value(&self) -> &Value {
        match self {
            Self::List(value) | Self::Map(value) => value,
        }
    }

    /// Rewrites every parameter slot that holds one of the known placeholder
    /// values. Nodes that are not objects or lack the field are skipped.
    pub fn patch(&mut self) -> PatchCounts {
        let mut counts = PatchCounts::default();
        match self {
            Self::List(root) => {
                let nodes = match root {
                    Value::Array(nodes) => Some(nodes),
                    Value::Object(map) => map.get_mut("nodes").and_then(Value::as_array_mut),
                    _ => None,
                };
                for node in nodes.into_iter().flatten() {
                    let Some(values) = node
                        .get_mut("widgets_values")
                        .and_then(Value::as_array_mut)
                    else {
                        continue;
                    };
                    for slot in values.iter_mut() {
                        if let Some(sub) = SUBSTITUTIONS.iter().find(|sub| is_str(slot, sub.from)) {
                            apply(slot, sub, &mut counts);
                        }
                    }
                }
            }
            Self::Map(root) => {
                for node in node_map(root).into_iter().flat_map(|map| map.values_mut()) {
                    let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut)
                    else {
                        continue;
                    };
                    for sub in &SUBSTITUTIONS {
                        if let Some(slot) = inputs.get_mut(sub.input) {
                            if is_str(slot, sub.from) {
                                apply(slot, sub, &mut counts);
                            }
                        }
                    }
                }
            }
        }
        counts
    }
}

/// Loads `input`, patches it and writes the result to `output` (which may be
/// the same path).
pub fn patch_file(input: &Utf8Path, output: &Utf8Path) -> Result<PatchCounts, ProvisionError> {
    let mut document = WorkflowDocument::load(input)?;
    let counts = document.patch();
    document.save(output)?;
    Ok(counts)
}

fn node_map(root: &mut Value) -> Option<&mut Map<String, Value>> {
    let nested = root
        .get("nodes")
        .map(Value::is_object)
        .unwrap_or(false);
    if nested {
        root.get_mut("nodes").and_then(Value::as_object_mut)
    } else {
        root.as_object_mut()
    }
}

fn is_str(value: &Value, expected: &str) -> bool {
    value.as_str() == Some(expected)
}

fn apply(slot: &mut Value, sub: &Substitution, counts: &mut PatchCounts) {
    *slot = Value::String(sub.to.to_string());
    counts.record(sub.rewrite);
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

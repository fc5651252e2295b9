//! Layered configuration ("bag").
//!
//! Config sources are deep-merged in order, later layers overriding earlier
//! ones at the leaf level: mappings merge key by key, sequences and scalars
//! are replaced wholesale. The merged mapping is read through a [`Bag`], a
//! dotted-path accessor that falls back on absent *or falsy* values.

use super::error::{Error, Result};
use serde_yaml_ng::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File extensions recognised for config files, in lookup order.
const CONFIG_EXTENSIONS: [&str; 4] = ["yaml", "yml", "json", "toml"];

/// One layer of configuration.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A config path: `P.{yaml,yml,json,toml}` plus files inside `P/`.
    Path(PathBuf),
    Inline(Value),
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        ConfigSource::Path(path)
    }
}

impl From<Value> for ConfigSource {
    fn from(value: Value) -> Self {
        ConfigSource::Inline(value)
    }
}

/// Read-only view over a merged config mapping.
#[derive(Debug, Clone)]
pub struct Bag {
    root: Arc<Mapping>,
}

impl Bag {
    /// Wrap a mapping. Anything else is an `InvalidBagSource` error.
    pub fn new(value: Value) -> Result<Self> {
        match value {
            Value::Mapping(root) => Ok(Self {
                root: Arc::new(root),
            }),
            other => Err(Error::InvalidBagSource(kind_of(&other))),
        }
    }

    /// Merge `sources` in order and wrap the result.
    pub fn layered(sources: &[ConfigSource]) -> Result<Self> {
        let mut merged = Value::Mapping(Mapping::new());
        for source in sources {
            let layer = match source {
                ConfigSource::Path(path) => load_layer(path)?,
                ConfigSource::Inline(value) => value.clone(),
            };
            patch(&mut merged, layer);
        }
        Self::new(merged)
    }

    /// The whole merged mapping.
    pub fn all(&self) -> &Mapping {
        &self.root
    }

    /// Look `key` up, returning `None` when it is absent or falsy.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if key.is_empty() {
            return None;
        }
        // A literal key takes precedence over path interpretation.
        let found = match self.root.get(key) {
            Some(value) => Some(value),
            None => lookup_path(&self.root, key),
        };
        found.filter(|v| !is_falsy(v))
    }

    pub fn get_or(&self, key: &str, fallback: Value) -> Value {
        self.get(key).cloned().unwrap_or(fallback)
    }

    /// The bag for one key, defaulting to an empty mapping.
    pub fn scoped(&self, key: &str) -> Result<Bag> {
        Bag::new(self.get_or(key, Value::Mapping(Mapping::new())))
    }
}

/// Deep-merge `layer` into `base`.
pub fn patch(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Mapping(base), Value::Mapping(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => patch(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, layer) => *slot = layer,
    }
}

/// JavaScript-style truthiness: null, false, zero, NaN and "" are falsy.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => match n.as_f64() {
            Some(f) => f == 0.0 || f.is_nan(),
            None => false,
        },
        Value::String(s) => s.is_empty(),
        Value::Tagged(tagged) => is_falsy(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => false,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged",
    }
}

/// Split `a.b[0].c` into `["a", "b", "0", "c"]`.
fn path_parts(key: &str) -> Vec<&str> {
    key.split(['.', '[', ']'])
        .filter(|part| !part.is_empty())
        .collect()
}

fn lookup_path<'a>(root: &'a Mapping, key: &str) -> Option<&'a Value> {
    let mut parts = path_parts(key).into_iter();
    let mut current = entry(root, parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Mapping(map) => entry(map, part)?,
            Value::Sequence(seq) => seq.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// A mapping entry by string key, or by integer key when `part` is numeric.
fn entry<'a>(map: &'a Mapping, part: &str) -> Option<&'a Value> {
    map.get(part).or_else(|| {
        let number = part.parse::<i64>().ok()?;
        map.get(Value::from(number))
    })
}

/// Load the config layer rooted at `path`. Missing files are empty layers.
pub fn load_layer(path: &Path) -> Result<Value> {
    let mut layer = Value::Mapping(Mapping::new());

    if let Some(base) = CONFIG_EXTENSIONS
        .iter()
        .map(|ext| with_extension(path, ext))
        .find(|candidate| candidate.is_file())
    {
        patch(&mut layer, read_config_file(&base)?);
    }

    if path.is_dir() {
        for file in scoped_files(path)? {
            let Some(stem) = file.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let mut scoped = Mapping::new();
            scoped.insert(Value::String(stem.to_string()), read_config_file(&file)?);
            patch(&mut layer, Value::Mapping(scoped));
        }
    }

    Ok(layer)
}

/// `config` → `config.yaml`, keeping any dots already in the file name.
fn with_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Config files directly inside `dir`, sorted by name.
fn scoped_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/*",
        glob::Pattern::escape(&dir.display().to_string())
    );
    let entries = glob::glob(&pattern).map_err(|e| Error::InvalidConfig {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| CONFIG_EXTENSIONS.contains(&e))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Parse a YAML, JSON or TOML file into a YAML value.
pub fn read_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    parse_config(path, &content)
}

pub(crate) fn parse_config(path: &Path, content: &str) -> Result<Value> {
    let invalid = |reason: String| Error::InvalidConfig {
        path: path.display().to_string(),
        reason,
    };
    let value = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str::<Value>(content).map_err(|e| invalid(e.to_string()))?,
        Some("toml") => toml::from_str::<Value>(content).map_err(|e| invalid(e.to_string()))?,
        _ => serde_yaml_ng::from_str::<Value>(content).map_err(|e| invalid(e.to_string()))?,
    };
    // An empty YAML document is an empty layer.
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

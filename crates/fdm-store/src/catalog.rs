use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use fdm_types::{config_error, BaselineProvider, FdmResult};

/// Static catalog of named baseline vectors.
///
/// Loaded from a JSON object mapping names to number arrays, e.g.
/// `{"default_lqr": [1.0, 0.5, 2.0], "quad_arm_lengths": [220.0, 220.0]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaselineCatalog {
    entries: BTreeMap<String, Vec<f64>>,
}

impl BaselineCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> FdmResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| config_error!("Cannot read baseline catalog {}: {}", path.display(), e))?;
        let catalog: Self = serde_json::from_str(&raw)
            .map_err(|e| config_error!("Invalid baseline catalog {}: {}", path.display(), e))?;

        tracing::info!("Loaded {} baselines from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.entries.insert(name.into(), values);
    }

    pub fn with_entry(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.insert(name, values);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl BaselineProvider for BaselineCatalog {
    fn get(&self, name: &str) -> FdmResult<Vec<f64>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| config_error!("Unknown baseline: {}", name))
    }
}

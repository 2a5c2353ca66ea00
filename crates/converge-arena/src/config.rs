// Arena bundle configuration.
//
// A bundle is a directory with an `arena.yaml` at its root naming the
// scenario files and tool endpoints, plus the scenario YAML files
// themselves. Providers are not part of the bundle: jobs resolve them
// from the Provider resources in their workspace namespace. Scenario
// files that fail to parse are skipped (and logged), never fatal to the
// job.

use std::path::{Path, PathBuf};

use converge_core::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// One assertion over an assistant reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Assertion {
    Contains { name: String, value: String },
    NotContains { name: String, value: String },
    Matches { name: String, pattern: String },
}

impl Assertion {
    pub fn name(&self) -> &str {
        match self {
            Assertion::Contains { name, .. }
            | Assertion::NotContains { name, .. }
            | Assertion::Matches { name, .. } => name,
        }
    }
}

/// One conversation turn in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnSpec {
    pub user: String,
    #[serde(default)]
    pub expect: Vec<Assertion>,
}

/// A scripted conversation with expectations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSpec {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub turns: Vec<TurnSpec>,
}

/// Tool endpoint descriptor carried into the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_handler_type")]
    pub handler_type: String,
}

fn default_handler_type() -> String {
    "http".to_string()
}

/// Root bundle manifest (`arena.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Scenario file paths relative to the bundle root
    pub scenarios: Vec<String>,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

impl ArenaConfig {
    /// Parse the manifest at the bundle root.
    pub fn load(bundle_dir: &Path) -> Result<Self> {
        let manifest = bundle_dir.join("arena.yaml");
        let raw = std::fs::read_to_string(&manifest).map_err(|e| {
            CoreError::fatal(format!("failed to read {}: {e}", manifest.display()))
        })?;
        serde_yaml::from_str(&raw)
            .map_err(|e| CoreError::validation(format!("invalid arena.yaml: {e}")))
    }
}

/// Load one scenario file. Invalid YAML returns `None` after logging; a
/// missing file is a real error.
pub fn load_scenario(bundle_dir: &Path, relative: &str) -> Result<Option<ScenarioSpec>> {
    let path: PathBuf = bundle_dir.join(relative);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| CoreError::fatal(format!("failed to read {}: {e}", path.display())))?;
    match serde_yaml::from_str::<ScenarioSpec>(&raw) {
        Ok(scenario) => Ok(Some(scenario)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unparseable scenario");
            Ok(None)
        }
    }
}

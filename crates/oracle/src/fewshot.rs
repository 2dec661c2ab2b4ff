//! Read-only few-shot demonstration store, keyed by source system.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One golden (log, template, description) triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Demonstration {
    pub log: String,
    pub template: String,
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FewShotError {
    #[error("failed to read few-shot file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse few-shot file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Demonstrations shared by every component. Loaded once, never mutated.
#[derive(Debug, Clone, Default)]
pub struct FewShotSet {
    by_system: IndexMap<String, Vec<Demonstration>>,
}

impl FewShotSet {
    pub fn from_map(by_system: IndexMap<String, Vec<Demonstration>>) -> Self {
        Self { by_system }
    }

    /// Load `{system: [demonstrations]}` from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, FewShotError> {
        let data = std::fs::read_to_string(path)?;
        let by_system: IndexMap<String, Vec<Demonstration>> = serde_json::from_str(&data)?;
        info!(
            path = %path.display(),
            systems = by_system.len(),
            "few-shot demonstrations loaded"
        );
        Ok(Self { by_system })
    }

    pub fn is_empty(&self) -> bool {
        self.by_system.is_empty()
    }

    /// Demonstrations for a system: its own set when present, otherwise one
    /// demonstration borrowed from each of the first `borrow_limit` other
    /// systems (stored order, so replays are deterministic), otherwise the
    /// built-in defaults.
    pub fn for_system(&self, system: &str, borrow_limit: usize) -> Vec<Demonstration> {
        if let Some(own) = self.by_system.get(system) {
            if !own.is_empty() {
                return own.clone();
            }
        }

        let borrowed: Vec<Demonstration> = self
            .by_system
            .iter()
            .filter(|(name, demos)| name.as_str() != system && !demos.is_empty())
            .take(borrow_limit)
            .map(|(_, demos)| demos[0].clone())
            .collect();
        if !borrowed.is_empty() {
            return borrowed;
        }

        Self::builtin()
    }

    /// An enriched set for hallucination-driven retries: the system's own
    /// demonstrations plus borrowed ones from other systems.
    pub fn enriched_for_system(&self, system: &str, borrow_limit: usize) -> Vec<Demonstration> {
        let mut demos = self.for_system(system, borrow_limit);
        let own_count = self.by_system.get(system).map_or(0, Vec::len);
        if own_count > 0 {
            demos.extend(
                self.by_system
                    .iter()
                    .filter(|(name, other)| name.as_str() != system && !other.is_empty())
                    .take(borrow_limit)
                    .map(|(_, other)| other[0].clone()),
            );
        }
        demos
    }

    fn builtin() -> Vec<Demonstration> {
        vec![
            Demonstration {
                log: "syslogd startup succeeded".into(),
                template: "<*> startup succeeded".into(),
                description: "The syslogd system log daemon started successfully.".into(),
            },
            Demonstration {
                log: "onStandStepChanged 3579".into(),
                template: "onStandStepChanged <*>".into(),
                description: "A change in standing step count was detected, with the current \
                              cumulative standing step count recorded as 3579."
                    .into(),
            },
        ]
    }
}

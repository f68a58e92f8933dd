use anyhow::{Result, bail};
use path_absolutize::Absolutize;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Organize manifest: the classifier's decisions for one run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// Base directory for relative paths. Defaults to the current directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Actions in the order they should be performed.
    pub actions: Vec<PlannedAction>,
}

/// A single decision about one file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    /// Relocate a classified file.
    Move {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Relocate a file whose predicted destination was taken.
    Duplicate {
        source: PathBuf,
        predicted_destination: PathBuf,
        actual_destination: PathBuf,
        #[serde(default = "default_duplicate_reason")]
        reason: String,
    },
    /// Send a file to the review area.
    RouteToReview {
        source: PathBuf,
        destination: PathBuf,
        reason: String,
    },
    /// Leave a file where it is.
    Skip { source: PathBuf, reason: String },
}

fn default_duplicate_reason() -> String {
    "duplicate_renamed".to_string()
}

impl PlannedAction {
    pub fn source(&self) -> &Path {
        match self {
            PlannedAction::Move { source, .. }
            | PlannedAction::Duplicate { source, .. }
            | PlannedAction::RouteToReview { source, .. }
            | PlannedAction::Skip { source, .. } => source,
        }
    }

    /// Where the file ends up, if it moves at all.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            PlannedAction::Move { destination, .. }
            | PlannedAction::RouteToReview { destination, .. } => Some(destination),
            PlannedAction::Duplicate {
                actual_destination, ..
            } => Some(actual_destination),
            PlannedAction::Skip { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlannedAction::Move { .. } => "move",
            PlannedAction::Duplicate { .. } => "duplicate",
            PlannedAction::RouteToReview { .. } => "route_to_review",
            PlannedAction::Skip { .. } => "skip",
        }
    }

    fn map_paths(self, f: impl Fn(&Path) -> PathBuf) -> Self {
        match self {
            PlannedAction::Move {
                source,
                destination,
            } => PlannedAction::Move {
                source: f(&source),
                destination: f(&destination),
            },
            PlannedAction::Duplicate {
                source,
                predicted_destination,
                actual_destination,
                reason,
            } => PlannedAction::Duplicate {
                source: f(&source),
                predicted_destination: f(&predicted_destination),
                actual_destination: f(&actual_destination),
                reason,
            },
            PlannedAction::RouteToReview {
                source,
                destination,
                reason,
            } => PlannedAction::RouteToReview {
                source: f(&source),
                destination: f(&destination),
                reason,
            },
            PlannedAction::Skip { source, reason } => PlannedAction::Skip {
                source: f(&source),
                reason,
            },
        }
    }
}

impl Plan {
    /// Basic sanity checks.
    pub fn validate(&self) -> Result<()> {
        if let Some(root) = &self.root
            && !root.is_absolute()
        {
            bail!("root must be an absolute path");
        }
        for action in &self.actions {
            if action.destination() == Some(action.source()) {
                bail!(
                    "{} action moves {} onto itself",
                    action.kind(),
                    action.source().display()
                );
            }
        }
        Ok(())
    }

    /// Make every path absolute against `root`, lexically.
    pub fn normalize(self) -> Result<Plan> {
        let base = match &self.root {
            Some(root) => root.clone(),
            None => std::env::current_dir()?,
        };
        let absolute = |p: &Path| -> PathBuf {
            p.absolutize_from(&base)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| base.join(p))
        };
        let actions = self
            .actions
            .into_iter()
            .map(|a| a.map_paths(absolute))
            .collect();
        Ok(Plan {
            root: Some(base),
            actions,
        })
    }
}

/// Generate JSON Schema for the Plan type.
pub fn generate_schema() -> String {
    let schema = schemars::schema_for!(Plan);
    serde_json::to_string_pretty(&schema).expect("failed to serialize schema")
}

/// Load a Plan from a JSON file.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let plan = serde_json::from_reader(reader)?;
    Ok(plan)
}

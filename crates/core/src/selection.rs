//! Narrowing freshly created runs down to the ones that should be skipped.
//!
//! Two pure filters applied in order: the stage filter keeps runs whose
//! container maps to the target stage, the exclusion filter keeps runs the
//! recommendation source named. A run is selected only if it passes both.

use crate::model::{CreatedLeaf, RecommendationResponse, PATH_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Container path (or `root / container`) to logical stage name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageMapping(BTreeMap<String, String>);

/// Which key produced a stage resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMatch {
    pub stage: String,
    pub key: String,
}

impl StageMapping {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }

    pub fn insert(&mut self, key: impl Into<String>, stage: impl Into<String>) {
        self.0.insert(key.into(), stage.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every stage named by the mapping, duplicates included.
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }

    /// Try each candidate key in order; first hit wins.
    fn first_hit<I>(&self, keys: I) -> Option<StageMatch>
    where
        I: IntoIterator<Item = String>,
    {
        keys.into_iter().find_map(|key| {
            self.0.get(&key).map(|stage| StageMatch {
                stage: stage.clone(),
                key,
            })
        })
    }

    /// Resolve a run's stage from its container name: the name as given,
    /// then the simplified `root / container` form.
    pub fn resolve_container(&self, container_name: &str, root_name: &str) -> Option<StageMatch> {
        self.first_hit([
            container_name.to_string(),
            simplified_key(root_name, container_name),
        ])
    }

    /// Resolve a stage from a full node path: the joined path, then `first / last`.
    pub fn resolve_path(&self, path: &[String]) -> Option<StageMatch> {
        let (first, last) = match (path.first(), path.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return None,
        };
        self.first_hit([path.join(PATH_SEPARATOR), simplified_key(first, last)])
    }
}

pub fn simplified_key(root_name: &str, container_name: &str) -> String {
    format!("{root_name}{PATH_SEPARATOR}{container_name}")
}

/// Names the recommendation source says may be skipped. Exact, case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet(HashSet<String>);

impl ExclusionSet {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn from_response(response: &RecommendationResponse) -> Self {
        Self::from_names(response.excluded_tests.iter().map(|t| t.test_name.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    NotCreated,
    NotInMapping,
    DifferentStage { stage: String },
    NotExcluded,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::NotCreated => write!(f, "run was not created"),
            DropReason::NotInMapping => write!(f, "not in mapping"),
            DropReason::DifferentStage { stage } => write!(f, "maps to stage \"{stage}\""),
            DropReason::NotExcluded => write!(f, "not in excluded tests"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dropped {
    pub leaf: CreatedLeaf,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    pub kept: Vec<CreatedLeaf>,
    pub dropped: Vec<Dropped>,
}

/// Keep created runs whose container resolves to `target_stage`.
pub fn stage_filter(
    leaves: &[CreatedLeaf],
    mapping: &StageMapping,
    root_name: &str,
    target_stage: &str,
) -> FilterOutcome {
    let mut out = FilterOutcome::default();
    for leaf in leaves {
        let reason = if !leaf.created {
            Some(DropReason::NotCreated)
        } else {
            match mapping.resolve_container(&leaf.container_name, root_name) {
                None => Some(DropReason::NotInMapping),
                Some(m) if m.stage == target_stage => {
                    debug!(
                        "in stage: {} (\"{}\" -> \"{}\")",
                        leaf.name, m.key, m.stage
                    );
                    None
                }
                Some(m) => Some(DropReason::DifferentStage { stage: m.stage }),
            }
        };
        match reason {
            None => out.kept.push(leaf.clone()),
            Some(reason) => out.dropped.push(Dropped {
                leaf: leaf.clone(),
                reason,
            }),
        }
    }
    out
}

/// Keep runs named in the exclusion set.
pub fn exclusion_filter(leaves: &[CreatedLeaf], exclusions: &ExclusionSet) -> FilterOutcome {
    let mut out = FilterOutcome::default();
    for leaf in leaves {
        if leaf.created && exclusions.contains(&leaf.name) {
            out.kept.push(leaf.clone());
        } else {
            let reason = if leaf.created {
                DropReason::NotExcluded
            } else {
                DropReason::NotCreated
            };
            out.dropped.push(Dropped {
                leaf: leaf.clone(),
                reason,
            });
        }
    }
    out
}

/// Result of the full selection pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Created runs that entered the pipeline.
    pub considered: usize,
    /// Runs that passed the stage filter.
    pub in_stage: usize,
    pub selected: Vec<CreatedLeaf>,
    pub dropped: Vec<Dropped>,
}

/// Stage filter followed by exclusion filter. Failed creations never enter.
pub fn filter_by_stage_and_exclusion(
    leaves: &[CreatedLeaf],
    mapping: &StageMapping,
    root_name: &str,
    target_stage: &str,
    exclusions: &ExclusionSet,
) -> Selection {
    let created: Vec<CreatedLeaf> = leaves.iter().filter(|l| l.created).cloned().collect();
    let staged = stage_filter(&created, mapping, root_name, target_stage);
    let excluded = exclusion_filter(&staged.kept, exclusions);

    let mut dropped = staged.dropped;
    dropped.extend(excluded.dropped);
    Selection {
        considered: created.len(),
        in_stage: staged.kept.len(),
        selected: excluded.kept,
        dropped,
    }
}

//! Reconciliation of q-sort placements against the grid.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::PlacementError;
use crate::grid::GridConfiguration;
use crate::study::Stimulus;

/// One stimulus dropped into one grid column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    /// Placed stimulus.
    pub stimulus_id: String,
    /// Column value, e.g. `-3`.
    pub column: i32,
}

impl Placement {
    /// Place `stimulus_id` in the column at `column`.
    pub fn new(stimulus_id: impl Into<String>, column: i32) -> Self {
        Self {
            stimulus_id: stimulus_id.into(),
            column,
        }
    }
}

/// Payload of the q-sort step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QSortPayload {
    /// One entry per sorted stimulus.
    pub placements: Vec<Placement>,
}

impl QSortPayload {
    /// Decode a payload as received from the participant flow.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, PlacementError> {
        serde_json::from_value(value.clone()).map_err(|e| PlacementError::Malformed {
            message: e.to_string(),
        })
    }

    /// Number of placements per column value.
    pub fn column_counts(&self) -> HashMap<i32, u32> {
        let mut counts = HashMap::new();
        for placement in &self.placements {
            *counts.entry(placement.column).or_insert(0) += 1;
        }
        counts
    }
}

/// Check that `payload` places every complete stimulus exactly once and that
/// no column receives more stimuli than it has cells.
///
/// Placements are checked in order, so the first offending placement is the
/// one reported. Capacity is checked in ascending column order, unplaced
/// stimuli last.
pub fn reconcile(
    grid: &GridConfiguration,
    stimuli: &[Stimulus],
    payload: &QSortPayload,
) -> Result<(), PlacementError> {
    let by_id: HashMap<&str, &Stimulus> = stimuli.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut placed: HashSet<&str> = HashSet::new();

    for placement in &payload.placements {
        let id = placement.stimulus_id.as_str();
        let stimulus = by_id
            .get(id)
            .ok_or_else(|| PlacementError::UnknownStimulus {
                stimulus_id: id.to_string(),
            })?;
        if !stimulus.is_complete() {
            return Err(PlacementError::IncompleteStimulus {
                stimulus_id: id.to_string(),
            });
        }
        if !placed.insert(id) {
            return Err(PlacementError::DuplicatePlacement {
                stimulus_id: id.to_string(),
            });
        }
        if grid.capacity_of(placement.column).is_none() {
            return Err(PlacementError::UnknownColumn {
                column: placement.column,
            });
        }
    }

    let counts = payload.column_counts();
    for column in &grid.columns {
        let count = counts.get(&column.value).copied().unwrap_or(0);
        if count > column.cells {
            return Err(PlacementError::OverCapacity {
                column: column.value,
                placed: count,
                capacity: column.cells,
            });
        }
    }

    let missing = stimuli
        .iter()
        .filter(|s| s.is_complete() && !placed.contains(s.id.as_str()))
        .count();
    if missing > 0 {
        return Err(PlacementError::Unplaced { missing });
    }

    Ok(())
}

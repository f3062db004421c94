//! Q-grid configuration, validation and mutation.
//!
//! A [`GridConfiguration`] partitions a bounded scale (for example `-3..=3`)
//! into one column per integer position, each holding a fixed number of
//! cells. The validator checks the structural invariants in a fixed order and
//! reports the first failure; the mutation methods keep `totalCells` in step
//! with the column counts.

pub mod shape;


use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};

/// Largest magnitude allowed for either range bound.
pub const MAX_RANGE_MAGNITUDE: u32 = 6;
/// Maximum length of the sorting instructions, in characters.
pub const MAX_INSTRUCTIONS_CHARS: usize = 500;

const DEFAULT_RANGE_MIN: i32 = -3;
const DEFAULT_CELLS: [u32; 7] = [1, 2, 3, 4, 3, 2, 1];

/// Named rule used to allocate cells across columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    /// Peaks at the center, thinning toward both ends.
    #[default]
    Bell,
    /// Roughly the same number of cells per column.
    Flat,
    /// More cells at the extremes than at the center.
    Forced,
}

impl std::fmt::Display for Distribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Distribution::Bell => write!(f, "bell"),
            Distribution::Flat => write!(f, "flat"),
            Distribution::Forced => write!(f, "forced"),
        }
    }
}

impl std::str::FromStr for Distribution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bell" => Ok(Distribution::Bell),
            "flat" => Ok(Distribution::Flat),
            "forced" => Ok(Distribution::Forced),
            _ => Err(format!("Unknown distribution: {}", s)),
        }
    }
}

/// One scale position of the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridColumn {
    /// Scale position, e.g. `-3` to `+3`.
    pub value: i32,
    /// Generated label for the position.
    pub label: String,
    /// Researcher-supplied label shown instead of `label`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_label: Option<String>,
    /// Number of statement slots in the column.
    pub cells: u32,
}

impl GridColumn {
    /// Create a column at `value` holding `cells` slots.
    pub fn new(value: i32, cells: u32) -> Self {
        Self {
            value,
            label: scale_label(value),
            custom_label: None,
            cells,
        }
    }

    /// Label to show participants.
    pub fn display_label(&self) -> &str {
        self.custom_label.as_deref().unwrap_or(&self.label)
    }
}

/// Signed label for a scale position (`"-2"`, `"0"`, `"+2"`).
pub fn scale_label(value: i32) -> String {
    if value > 0 {
        format!("+{}", value)
    } else {
        value.to_string()
    }
}

/// Outcome of [`GridConfiguration::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether every rule passed.
    pub valid: bool,
    /// Message of the first rule that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(message.into()),
        }
    }
}

/// The forced-distribution grid participants sort stimuli onto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridConfiguration {
    /// Lowest scale position.
    pub range_min: i32,
    /// Highest scale position.
    pub range_max: i32,
    /// Columns ascending by `value`.
    pub columns: Vec<GridColumn>,
    /// Whether mirrored columns must hold equal counts.
    pub symmetry: bool,
    /// Sum of every column's cells, and the number of stimuli a study needs.
    pub total_cells: u32,
    /// Shape the cells were last generated from.
    pub distribution: Distribution,
    /// Sorting instructions shown to participants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl Default for GridConfiguration {
    fn default() -> Self {
        let columns: Vec<GridColumn> = DEFAULT_CELLS
            .iter()
            .enumerate()
            .map(|(i, &cells)| GridColumn::new(DEFAULT_RANGE_MIN + i as i32, cells))
            .collect();

        Self {
            range_min: DEFAULT_RANGE_MIN,
            range_max: DEFAULT_RANGE_MIN + DEFAULT_CELLS.len() as i32 - 1,
            total_cells: DEFAULT_CELLS.iter().sum(),
            columns,
            symmetry: true,
            distribution: Distribution::Bell,
            instructions: None,
        }
    }
}

/// Partial update merged by [`GridConfiguration::apply_patch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridPatch {
    /// New lower bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_min: Option<i32>,
    /// New upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_max: Option<i32>,
    /// Replacement column list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<GridColumn>>,
    /// New symmetry flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symmetry: Option<bool>,
    /// New cell total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cells: Option<u32>,
    /// New distribution label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
    /// `Some(None)` clears the instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Option<String>>,
}

fn check_range(min: i32, max: i32) -> GridResult<usize> {
    if min >= max
        || min.unsigned_abs() > MAX_RANGE_MAGNITUDE
        || max.unsigned_abs() > MAX_RANGE_MAGNITUDE
    {
        return Err(GridError::InvalidRange { min, max });
    }
    Ok((max - min + 1) as usize)
}

impl GridConfiguration {
    /// Build a grid for `min..=max` with cells generated from `distribution`.
    ///
    /// The symmetry flag is set when the generated counts mirror around the
    /// center, which is always the case for an odd number of columns.
    pub fn from_preset(
        min: i32,
        max: i32,
        distribution: Distribution,
        total_cells: u32,
    ) -> GridResult<Self> {
        let count = check_range(min, max)?;
        let cells = shape::generate(distribution, count, total_cells)?;

        let mut grid = Self {
            range_min: min,
            range_max: max,
            columns: build_columns(min, &cells, &HashMap::new()),
            symmetry: false,
            total_cells,
            distribution,
            instructions: None,
        };
        grid.symmetry = grid.is_mirrored();
        Ok(grid)
    }

    /// Number of columns currently configured.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Cell counts in column order.
    pub fn cells(&self) -> Vec<u32> {
        self.columns.iter().map(|c| c.cells).collect()
    }

    /// Capacity of the column at `value`, if it exists.
    pub fn capacity_of(&self, value: i32) -> Option<u32> {
        self.columns.iter().find(|c| c.value == value).map(|c| c.cells)
    }

    /// Whether every column holds as many cells as its mirror.
    pub fn is_mirrored(&self) -> bool {
        let n = self.columns.len();
        (0..n / 2).all(|i| self.columns[i].cells == self.columns[n - 1 - i].cells)
    }

    /// Check the structural invariants, stopping at the first failure.
    ///
    /// Rules run in order: range bounds, one contiguous ascending column per
    /// scale position, cells summing to `totalCells`, mirrored counts when
    /// symmetric, and the instructions length.
    pub fn validate(&self) -> ValidationResult {
        if self.range_min >= self.range_max {
            return ValidationResult::fail("rangeMin must be less than rangeMax");
        }
        if self.range_min.unsigned_abs() > MAX_RANGE_MAGNITUDE
            || self.range_max.unsigned_abs() > MAX_RANGE_MAGNITUDE
        {
            return ValidationResult::fail(format!(
                "Range bounds must be within -{0}..{0}",
                MAX_RANGE_MAGNITUDE
            ));
        }

        let expected = (self.range_max - self.range_min + 1) as usize;
        if self.columns.len() != expected {
            return ValidationResult::fail(format!(
                "Expected {} columns for range {}..{}, found {}",
                expected,
                self.range_min,
                self.range_max,
                self.columns.len()
            ));
        }
        for (i, column) in self.columns.iter().enumerate() {
            let value = self.range_min + i as i32;
            if column.value != value {
                return ValidationResult::fail(format!(
                    "Column {} has value {}, expected {}",
                    i, column.value, value
                ));
            }
        }

        let sum: u64 = self.columns.iter().map(|c| u64::from(c.cells)).sum();
        if sum != u64::from(self.total_cells) {
            return ValidationResult::fail(format!(
                "Column cells sum to {} but totalCells is {}",
                sum, self.total_cells
            ));
        }

        if self.symmetry {
            let n = self.columns.len();
            for i in 0..n / 2 {
                let (left, right) = (&self.columns[i], &self.columns[n - 1 - i]);
                if left.cells != right.cells {
                    return ValidationResult::fail(format!(
                        "Symmetric grid requires columns {} and {} to hold the same number of cells",
                        left.value, right.value
                    ));
                }
            }
        }

        if let Some(instructions) = &self.instructions {
            let len = instructions.chars().count();
            if len > MAX_INSTRUCTIONS_CHARS {
                return ValidationResult::fail(format!(
                    "Instructions must be at most {} characters (got {})",
                    MAX_INSTRUCTIONS_CHARS, len
                ));
            }
        }

        ValidationResult::ok()
    }

    /// Change the scale span, regenerating the columns from the current
    /// distribution and `totalCells`.
    pub fn set_range(&mut self, min: i32, max: i32) -> GridResult<()> {
        let count = check_range(min, max)?;
        let cells = shape::generate(self.distribution, count, self.total_cells)?;
        self.replace_columns(min, max, &cells);
        Ok(())
    }

    /// Change the scale span using caller-supplied cell counts.
    /// `totalCells` becomes their sum.
    pub fn set_range_with_cells(&mut self, min: i32, max: i32, cells: &[u32]) -> GridResult<()> {
        let count = check_range(min, max)?;
        if cells.len() != count {
            return Err(GridError::CellCountMismatch {
                expected: count,
                actual: cells.len(),
            });
        }
        let total = checked_total(cells.iter().copied())?;
        self.replace_columns(min, max, cells);
        self.total_cells = total;
        Ok(())
    }

    /// Regenerate every column's cells for `distribution`.
    pub fn set_distribution(&mut self, distribution: Distribution) -> GridResult<()> {
        let cells = shape::generate(distribution, self.columns.len(), self.total_cells)?;
        for (column, cells) in self.columns.iter_mut().zip(cells) {
            column.cells = cells;
        }
        self.distribution = distribution;
        Ok(())
    }

    /// Flip the symmetry flag. Turning it on copies the lower half's counts
    /// onto the upper half.
    ///
    /// Fails with [`GridError::TooManyCells`], leaving the grid untouched,
    /// when the mirrored counts no longer fit `totalCells`.
    pub fn toggle_symmetry(&mut self) -> GridResult<()> {
        if self.symmetry {
            self.symmetry = false;
            return Ok(());
        }

        let mut cells = self.cells();
        let n = cells.len();
        for i in 0..n / 2 {
            cells[n - 1 - i] = cells[i];
        }
        self.commit_cells(&cells)?;
        self.symmetry = true;
        Ok(())
    }

    /// Set one column's cell count, mirroring it when the grid is symmetric.
    ///
    /// Fails with [`GridError::TooManyCells`], leaving the grid untouched,
    /// when the new counts no longer fit `totalCells`.
    pub fn set_cell(&mut self, value: i32, cells: u32) -> GridResult<()> {
        let index = self.index_of(value)?;
        let mut counts = self.cells();
        counts[index] = cells;
        if self.symmetry {
            let mirror = counts.len() - 1 - index;
            counts[mirror] = cells;
        }
        self.commit_cells(&counts)
    }

    /// Set or clear the researcher label of one column.
    pub fn set_custom_label(&mut self, value: i32, label: Option<String>) -> GridResult<()> {
        let index = self.index_of(value)?;
        self.columns[index].custom_label = label.filter(|l| !l.trim().is_empty());
        Ok(())
    }

    /// Shallow-merge `patch` into this configuration. No validation.
    pub fn apply_patch(&mut self, patch: GridPatch) {
        if let Some(range_min) = patch.range_min {
            self.range_min = range_min;
        }
        if let Some(range_max) = patch.range_max {
            self.range_max = range_max;
        }
        if let Some(columns) = patch.columns {
            self.columns = columns;
        }
        if let Some(symmetry) = patch.symmetry {
            self.symmetry = symmetry;
        }
        if let Some(total_cells) = patch.total_cells {
            self.total_cells = total_cells;
        }
        if let Some(distribution) = patch.distribution {
            self.distribution = distribution;
        }
        if let Some(instructions) = patch.instructions {
            self.instructions = instructions;
        }
    }

    fn index_of(&self, value: i32) -> GridResult<usize> {
        self.columns
            .iter()
            .position(|c| c.value == value)
            .ok_or(GridError::UnknownColumn { value })
    }

    fn replace_columns(&mut self, min: i32, max: i32, cells: &[u32]) {
        let labels: HashMap<i32, String> = self
            .columns
            .iter()
            .filter_map(|c| c.custom_label.clone().map(|l| (c.value, l)))
            .collect();
        self.columns = build_columns(min, cells, &labels);
        self.range_min = min;
        self.range_max = max;
    }

    /// Write `cells` into the columns and `totalCells`, or nothing at all
    /// when their sum overflows.
    fn commit_cells(&mut self, cells: &[u32]) -> GridResult<()> {
        let total = checked_total(cells.iter().copied())?;
        for (column, &count) in self.columns.iter_mut().zip(cells) {
            column.cells = count;
        }
        self.total_cells = total;
        Ok(())
    }
}

fn checked_total(cells: impl Iterator<Item = u32>) -> GridResult<u32> {
    let total: u64 = cells.map(u64::from).sum();
    u32::try_from(total).map_err(|_| GridError::TooManyCells { total })
}

fn build_columns(min: i32, cells: &[u32], labels: &HashMap<i32, String>) -> Vec<GridColumn> {
    cells
        .iter()
        .enumerate()
        .map(|(i, &cells)| {
            let value = min + i as i32;
            let mut column = GridColumn::new(value, cells);
            column.custom_label = labels.get(&value).cloned();
            column
        })
        .collect()
}

//! Command-line interface.
//!
//! `serve` runs the JSON-RPC server; the grid commands work offline on a
//! single configuration.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::grid::{Distribution, GridConfiguration};

/// Q-methodology study engine.
#[derive(Parser, Debug)]
#[command(name = "qgrid", version, about = "Q-grid configuration and participant session engine")]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve JSON-RPC requests on stdin/stdout
    Serve,

    /// Generate a grid for a range and distribution shape
    GridPreview {
        /// Lowest scale value
        #[arg(long, default_value = "-3", allow_negative_numbers = true)]
        min: i32,

        /// Highest scale value
        #[arg(long, default_value = "3", allow_negative_numbers = true)]
        max: i32,

        /// Distribution shape: bell, flat or forced
        #[arg(long, default_value = "bell")]
        distribution: Distribution,

        /// Total number of cells
        #[arg(long, default_value = "16")]
        total: u32,

        /// Print the configuration as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a grid configuration stored as JSON
    GridCheck {
        /// Path to the configuration file
        path: PathBuf,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute an offline command. `serve` is handled by the binary.
pub fn execute_command(command: Commands) -> CliResult {
    match command {
        Commands::Serve => CliResult::error("serve is not an offline command"),
        Commands::GridPreview {
            min,
            max,
            distribution,
            total,
            json,
        } => execute_grid_preview(min, max, distribution, total, json),
        Commands::GridCheck { path } => execute_grid_check(&path),
    }
}

fn execute_grid_preview(
    min: i32,
    max: i32,
    distribution: Distribution,
    total: u32,
    json: bool,
) -> CliResult {
    let grid = match GridConfiguration::from_preset(min, max, distribution, total) {
        Ok(grid) => grid,
        Err(e) => return CliResult::error(format!("Error: {}", e)),
    };

    if json {
        match serde_json::to_string_pretty(&grid) {
            Ok(text) => CliResult::success(text),
            Err(e) => CliResult::error(format!("Error: {}", e)),
        }
    } else {
        CliResult::success(render_grid(&grid))
    }
}

fn execute_grid_check(path: &Path) -> CliResult {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => return CliResult::error(format!("Cannot read {}: {}", path.display(), e)),
    };
    let grid: GridConfiguration = match serde_json::from_str(&text) {
        Ok(grid) => grid,
        Err(e) => return CliResult::error(format!("Not a grid configuration: {}", e)),
    };

    let result = grid.validate();
    match result.error {
        None => CliResult::success(format!("OK\n{}", render_grid(&grid))),
        Some(message) => CliResult::error(format!("Invalid: {}", message)),
    }
}

/// One line per column: label, a bar of cells and the count.
pub fn render_grid(grid: &GridConfiguration) -> String {
    let mut output = format!(
        "Grid {}..{} ({}, {} cells{})\n",
        grid.range_min,
        grid.range_max,
        grid.distribution,
        grid.total_cells,
        if grid.symmetry { ", symmetric" } else { "" }
    );

    for column in &grid.columns {
        output.push_str(&format!(
            "{:>4} | {:<width$} {}\n",
            column.display_label(),
            "#".repeat(column.cells as usize),
            column.cells,
            width = grid.columns.iter().map(|c| c.cells).max().unwrap_or(0) as usize
        ));
    }

    output
}

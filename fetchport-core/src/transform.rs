//! Column transform engine: rename, then reorder.
//!
//! Conflicting or out-of-range instructions never fail a run. They are
//! resolved deterministically (later instruction wins, positions clamp to the
//! last column) and reported as [`TransformConflict`]s, each logged at warn.
//! Reordering always yields a permutation of the source columns; anything
//! else is a [`FetchportError::TransformIntegrity`].

use std::fmt;

use tracing::{debug, warn};

use crate::models::{ColumnInstruction, Table};
use crate::{FetchportError, Result};

/// A non-fatal issue found while resolving instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformConflict {
    /// Instruction index does not name a column
    IndexOutOfRange {
        instruction: usize,
        index: usize,
        column_count: usize,
    },
    /// A later rename of the same column replaced an earlier one
    RenameOverridden {
        index: usize,
        previous: String,
        replacement: String,
    },
    /// Rename skipped because the final column names would repeat it
    DuplicateName { index: usize, name: String },
    /// Rename skipped because the new name is blank
    BlankName { instruction: usize },
    /// Requested position beyond the last column
    PositionClamped {
        index: usize,
        requested: usize,
        clamped: usize,
    },
    /// A later move of the same column replaced an earlier one
    PositionOverridden {
        index: usize,
        previous: usize,
        replacement: usize,
    },
    /// Two columns targeted the same slot; the later one kept it
    SlotCollision {
        position: usize,
        displaced: usize,
        placed: usize,
    },
}

impl fmt::Display for TransformConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexOutOfRange {
                instruction,
                index,
                column_count,
            } => write!(
                f,
                "instruction {} targets column {} but the table has {} columns; skipped",
                instruction, index, column_count
            ),
            Self::RenameOverridden {
                index,
                previous,
                replacement,
            } => write!(
                f,
                "column {} renamed twice; '{}' replaces '{}'",
                index, replacement, previous
            ),
            Self::DuplicateName { index, name } => write!(
                f,
                "column {} not renamed: another column is already named '{}'",
                index, name
            ),
            Self::BlankName { instruction } => {
                write!(f, "instruction {} has a blank name; rename skipped", instruction)
            }
            Self::PositionClamped {
                index,
                requested,
                clamped,
            } => write!(
                f,
                "column {} requested position {}; clamped to {}",
                index, requested, clamped
            ),
            Self::PositionOverridden {
                index,
                previous,
                replacement,
            } => write!(
                f,
                "column {} moved twice; position {} replaces {}",
                index, replacement, previous
            ),
            Self::SlotCollision {
                position,
                displaced,
                placed,
            } => write!(
                f,
                "columns {} and {} both target position {}; column {} keeps it",
                displaced, placed, position, placed
            ),
        }
    }
}

/// Conflicts found during one transform, in detection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub conflicts: Vec<TransformConflict>,
}

impl TransformReport {
    fn record(&mut self, conflict: TransformConflict) {
        warn!("Transform conflict: {}", conflict);
        self.conflicts.push(conflict);
    }

    /// True when every instruction applied cleanly.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// A transformed table with the conflicts met on the way.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub table: Table,
    pub report: TransformReport,
}

/// An instruction whose index names an existing column.
#[derive(Debug, Clone, Copy)]
pub struct Targeted<'a> {
    /// Position of the instruction in its batch
    pub position: usize,
    /// Source column index
    pub index: usize,
    pub instruction: &'a ColumnInstruction,
}

/// Keeps the instructions that name an existing column.
///
/// Inert instructions are dropped silently; out-of-range ones are reported
/// once here, before renames and moves are planned.
pub fn targeted<'a>(
    instructions: &'a [ColumnInstruction],
    column_count: usize,
    report: &mut TransformReport,
) -> Vec<Targeted<'a>> {
    instructions
        .iter()
        .enumerate()
        .filter_map(|(position, instruction)| {
            let index = instruction.index?;
            if instruction.is_inert() {
                return None;
            }
            if index >= column_count {
                report.record(TransformConflict::IndexOutOfRange {
                    instruction: position,
                    index,
                    column_count,
                });
                return None;
            }
            Some(Targeted {
                position,
                index,
                instruction,
            })
        })
        .collect()
}

/// Resolves renames into the final column names.
///
/// All renames apply at once, so names can be swapped. The later of two
/// renames for the same column wins. A rename whose name would appear twice
/// in the final column list is skipped; when two renames clash, the earlier
/// one is skipped.
pub fn plan_renames(
    columns: &[String],
    targets: &[Targeted<'_>],
    report: &mut TransformReport,
) -> Vec<String> {
    // (source index, new name) in the order the winning instruction appeared
    let mut renames: Vec<(usize, String)> = Vec::new();

    for target in targets {
        let Some(name) = target.instruction.new_name.as_deref() else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            report.record(TransformConflict::BlankName {
                instruction: target.position,
            });
            continue;
        }

        if let Some(existing) = renames.iter().position(|(i, _)| *i == target.index) {
            let (_, previous) = renames.remove(existing);
            report.record(TransformConflict::RenameOverridden {
                index: target.index,
                previous,
                replacement: name.to_string(),
            });
        }
        renames.push((target.index, name.to_string()));
    }

    loop {
        let names = renamed(columns, &renames);
        let clash = renames.iter().position(|(index, name)| {
            names
                .iter()
                .enumerate()
                .any(|(other, existing)| other != *index && existing == name)
        });
        let Some(clash) = clash else {
            break;
        };
        let (index, name) = renames.remove(clash);
        report.record(TransformConflict::DuplicateName { index, name });
    }

    let names = renamed(columns, &renames);
    for (index, name) in &renames {
        debug!("Renaming column {} '{}' to '{}'", index, columns[*index], name);
    }
    names
}

fn renamed(columns: &[String], renames: &[(usize, String)]) -> Vec<String> {
    let mut names = columns.to_vec();
    for (index, name) in renames {
        names[*index].clone_from(name);
    }
    names
}

/// Resolves moves into the final order of source column indexes.
///
/// Explicit moves are placed first (clamped, later writer wins a slot), then
/// the remaining columns fill the free slots left to right in their original
/// order.
///
/// # Errors
/// Returns a transform integrity error if the result is not a permutation
/// of `0..column_count`.
pub fn plan_order(
    column_count: usize,
    targets: &[Targeted<'_>],
    report: &mut TransformReport,
) -> Result<Vec<usize>> {
    if column_count == 0 {
        return Ok(Vec::new());
    }
    let last = column_count.saturating_sub(1);

    // (source index, target slot); an override moves the entry to the end so
    // slot collisions resolve in instruction order.
    let mut moves: Vec<(usize, usize)> = Vec::new();
    for entry in targets {
        let index = entry.index;
        let Some(requested) = entry.instruction.new_position else {
            continue;
        };
        let target = if requested > last {
            report.record(TransformConflict::PositionClamped {
                index,
                requested,
                clamped: last,
            });
            last
        } else {
            requested
        };

        if let Some(existing) = moves.iter().position(|(i, _)| *i == index) {
            let (_, previous) = moves.remove(existing);
            report.record(TransformConflict::PositionOverridden {
                index,
                previous,
                replacement: target,
            });
        }
        moves.push((index, target));
    }

    let mut slots: Vec<Option<usize>> = vec![None; column_count];
    let mut placed = vec![false; column_count];
    for (index, target) in moves {
        if let Some(displaced) = slots[target] {
            report.record(TransformConflict::SlotCollision {
                position: target,
                displaced,
                placed: index,
            });
            placed[displaced] = false;
        }
        slots[target] = Some(index);
        placed[index] = true;
    }

    let mut unplaced = (0..column_count).filter(|index| !placed[*index]);
    let order: Vec<usize> = slots
        .into_iter()
        .map(|slot| slot.or_else(|| unplaced.next()))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            FetchportError::transform_integrity("reorder left a position without a column")
        })?;

    let mut seen = vec![false; column_count];
    for &index in &order {
        if std::mem::replace(&mut seen[index], true) {
            return Err(FetchportError::transform_integrity(format!(
                "reorder placed column {} twice",
                index
            )));
        }
    }
    if order.len() != column_count || unplaced.next().is_some() {
        return Err(FetchportError::transform_integrity(format!(
            "reorder produced {} columns from {}",
            order.len(),
            column_count
        )));
    }

    Ok(order)
}

/// Applies renames, then the reorder, to a materialized table.
///
/// # Errors
/// Returns a transform integrity error if the output column count differs
/// from the input.
pub fn apply_instructions(table: Table, instructions: &[ColumnInstruction]) -> Result<Transformed> {
    let mut report = TransformReport::default();
    let column_count = table.column_count();

    let targets = targeted(instructions, column_count, &mut report);
    let names = plan_renames(table.columns(), &targets, &mut report);
    let order = plan_order(column_count, &targets, &mut report)?;

    let (_, rows) = table.into_parts();
    let columns: Vec<String> = order.iter().map(|&index| names[index].clone()).collect();
    if columns.len() != column_count {
        return Err(FetchportError::transform_integrity(format!(
            "expected {} columns after reorder, found {}",
            column_count,
            columns.len()
        )));
    }

    let rows = rows
        .into_iter()
        .map(|mut row| {
            order
                .iter()
                .map(|&index| std::mem::take(&mut row[index]))
                .collect()
        })
        .collect();

    let table = Table::from_rows(columns, rows)?;
    Ok(Transformed { table, report })
}

//! Non-fatal problems found while building an index.
//!
//! Fatal problems unwind as an `Error`. Everything else is collected into a `Diagnostics` report
//! that the caller owns, so it is available whether the build succeeds or fails.
//!
use std::fmt;

use tracing::{error, info, warn};

use crate::coord::Axis;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Diagnostic {
    /// A partition's child index could not be read or built. The partition is left out.
    PartitionOpenFailure { partition: String, reason: String },

    /// A partition has no group for one of the canonical partition's grids.
    GroupMissingInPartition { partition: String, gds_hash: u32 },

    /// A partition has a group whose grid the canonical partition lacks. The group is left out of
    /// the merged schema.
    GroupNotInCanonical { partition: String, gds_hash: u32 },

    /// A partition doesn't have a variable the canonical partition has. It contributes no data
    /// for that variable.
    VariableMissingInPartition {
        partition: String,
        variable: String,
        cdm_hash: u32,
    },

    /// A partition has a variable the canonical partition lacks. The variable is left out of the
    /// merged schema.
    VariableNotInCanonical {
        partition: String,
        variable: String,
        cdm_hash: u32,
    },

    /// Both partitions have the coordinate but its values differ.
    CoordinateMismatchWarning {
        partition: String,
        variable: String,
        axis: Axis,
    },

    /// A partition's time axis is not the same kind or unit as the canonical one. The partition
    /// contributes no data for that variable.
    TimeKindMismatch { partition: String, variable: String },

    /// A record disagrees with earlier records of its variable about which axes it has, or what
    /// kind of time it carries. The record is dropped.
    InconsistentRecord {
        file: String,
        variable: String,
        axis: Axis,
    },

    /// Two records map to the same coordinates. The later one is kept.
    DuplicateRecord { file: String, variable: String },

    /// A source file's originating center or tables differ from the collection's.
    OriginMismatch { file: String },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::PartitionOpenFailure { .. } => Severity::Warning,
            Diagnostic::GroupMissingInPartition { .. } => Severity::Warning,
            Diagnostic::GroupNotInCanonical { .. } => Severity::Warning,
            Diagnostic::VariableMissingInPartition { .. } => Severity::Warning,
            Diagnostic::VariableNotInCanonical { .. } => Severity::Warning,
            Diagnostic::CoordinateMismatchWarning { .. } => Severity::Warning,
            Diagnostic::TimeKindMismatch { .. } => Severity::Error,
            Diagnostic::InconsistentRecord { .. } => Severity::Warning,
            Diagnostic::DuplicateRecord { .. } => Severity::Info,
            Diagnostic::OriginMismatch { .. } => Severity::Warning,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::PartitionOpenFailure { partition, reason } => {
                write!(f, "partition {partition} could not be opened: {reason}")
            }
            Diagnostic::GroupMissingInPartition {
                partition,
                gds_hash,
            } => write!(f, "partition {partition} has no group for grid {gds_hash:08x}"),
            Diagnostic::GroupNotInCanonical {
                partition,
                gds_hash,
            } => write!(
                f,
                "grid {gds_hash:08x} of partition {partition} is not in the canonical partition"
            ),
            Diagnostic::VariableMissingInPartition {
                partition,
                variable,
                ..
            } => write!(f, "partition {partition} is missing variable {variable}"),
            Diagnostic::VariableNotInCanonical {
                partition,
                variable,
                ..
            } => write!(
                f,
                "variable {variable} of partition {partition} is not in the canonical partition"
            ),
            Diagnostic::CoordinateMismatchWarning {
                partition,
                variable,
                axis,
            } => write!(
                f,
                "{axis} coordinate of {variable} in partition {partition} differs from canonical"
            ),
            Diagnostic::TimeKindMismatch {
                partition,
                variable,
            } => write!(
                f,
                "time coordinate of {variable} in partition {partition} is incompatible with canonical"
            ),
            Diagnostic::InconsistentRecord {
                file,
                variable,
                axis,
            } => write!(f, "record of {variable} in {file} has inconsistent {axis} coordinate"),
            Diagnostic::DuplicateRecord { file, variable } => {
                write!(f, "duplicate record of {variable} in {file}")
            }
            Diagnostic::OriginMismatch { file } => {
                write!(f, "{file} has a different originating center or tables")
            }
        }
    }
}

/// The report of everything that went wrong, but not fatally, during a build.
///
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic, logging it at its severity.
    ///
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Info => info!("{diagnostic}"),
            Severity::Warning => warn!("{diagnostic}"),
            Severity::Error => error!("{diagnostic}"),
        }
        self.entries.push(diagnostic);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Diagnostics at or above the given severity
    pub fn at_least(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(move |diagnostic| diagnostic.severity() >= severity)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.entries.iter()
    }
}

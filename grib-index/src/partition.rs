//! Merging the indexes of several time partitions into one partitioned index.
//!
//! Every partition is a plain collection with its own index. The partitioned index takes its
//! schema (groups, variables, vertical and ensemble axes) from one canonical partition, and for
//! each variable records where in every other partition the same variable lives, together with
//! the union of all partitions' time axes.
//!
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{
    build::{build_collection, CollectionConfig},
    codec::{self, Variant},
    collection::{
        CollectionIndex, Group, GroupParts, IndexKind, Partition, PartitionLocator,
        PartitionOverlay, VariableData, VariableIndex,
    },
    coord::{Axis, Pool},
    diagnostics::{Diagnostic, Diagnostics},
    errors::{Error, Result},
    helpers::{file_stamp, now, Stamp},
    rebuild::sources_changed,
    source::Sources,
    union::union_time_coords,
};

/// One time partition: a plain collection and where its index lives.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionConfig {
    pub name: String,
    pub directory: PathBuf,
    pub index_filename: String,
}

impl PartitionConfig {
    pub fn new<S, P, F>(name: S, directory: P, index_filename: F) -> Self
    where
        S: Into<String>,
        P: Into<PathBuf>,
        F: Into<String>,
    {
        Self {
            name: name.into(),
            directory: directory.into(),
            index_filename: index_filename.into(),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.directory.join(&self.index_filename)
    }
}

/// A time partitioned collection.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionedConfig {
    pub name: String,
    pub directory: PathBuf,

    /// Where the partitioned index is written
    pub index_path: PathBuf,

    /// Partitions in time order
    pub partitions: Vec<PartitionConfig>,

    /// Rebuild a partition's index from its source files when it is missing, unreadable or out
    /// of date. Needs `Sources`.
    pub rebuild_children: bool,
}

struct Child<'a> {
    config: &'a PartitionConfig,
    index: CollectionIndex,
    last_modified: Stamp,
}

impl Child<'_> {
    fn variable_count(&self) -> usize {
        self.index
            .groups()
            .iter()
            .map(|group| group.variables().len())
            .sum()
    }
}

/// Builds a partitioned index from its partitions' indexes.
///
pub struct TimePartitionBuilder<'a> {
    config: &'a PartitionedConfig,
    sources: Option<Sources<'a>>,
}

impl<'a> TimePartitionBuilder<'a> {
    pub fn new(config: &'a PartitionedConfig) -> Self {
        Self {
            config,
            sources: None,
        }
    }

    /// Collaborators used to rebuild partition indexes, see `PartitionedConfig::rebuild_children`
    pub fn with_sources(mut self, sources: Sources<'a>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Build the partitioned index in memory.
    ///
    /// Partitions that can't be opened are left out with a diagnostic. Fails if none can be
    /// opened, or if a variable has a vertical or ensemble axis in one partition but not in
    /// another.
    ///
    pub fn build(&self, diagnostics: &mut Diagnostics) -> Result<CollectionIndex> {
        let mut children = vec![];
        for partition in &self.config.partitions {
            match self.open_child(partition, diagnostics) {
                Ok(child) => children.push(child),
                Err(err) => diagnostics.push(Diagnostic::PartitionOpenFailure {
                    partition: partition.name.clone(),
                    reason: err.to_string(),
                }),
            }
        }
        if children.is_empty() {
            return Err(Error::NoPartitionsSucceeded(self.config.name.clone()));
        }

        let canonical = canonical_partition(&children);
        debug!(
            collection = %self.config.name,
            partitions = children.len(),
            canonical = %children[canonical].config.name,
            "merging partitions"
        );

        let schema = &children[canonical].index;
        for (p, child) in children.iter().enumerate() {
            if p == canonical {
                continue;
            }
            for group in child.index.groups() {
                if schema.find_group(group.gds_hash()).is_none() {
                    diagnostics.push(Diagnostic::GroupNotInCanonical {
                        partition: child.config.name.clone(),
                        gds_hash: group.gds_hash(),
                    });
                }
            }
        }

        let mut groups = vec![];
        for group in schema.groups() {
            groups.push(merge_group(group, &children, canonical, diagnostics)?);
        }

        let partitions = children
            .iter()
            .map(|child| Partition {
                name: child.config.name.clone(),
                directory: child.config.directory.clone(),
                index_filename: child.config.index_filename.clone(),
                last_modified: child.last_modified,
            })
            .collect();

        let index = CollectionIndex::new(
            self.config.name.clone(),
            self.config.directory.clone(),
            children[canonical].index.origin(),
            vec![],
            groups,
            IndexKind::Partitioned {
                partitions,
                built: now(),
            },
        )?;

        info!(
            collection = %index.name(),
            partitions = index.partitions().len(),
            groups = index.groups().len(),
            "built partitioned index"
        );

        Ok(index)
    }

    /// Build the partitioned index and write it to the configured path.
    ///
    /// If anything fails, no index is left at the path, including one from an earlier build.
    ///
    pub fn build_and_write(&self, diagnostics: &mut Diagnostics) -> Result<CollectionIndex> {
        let path = &self.config.index_path;
        let result = self
            .build(diagnostics)
            .and_then(|index| codec::write_index(path, &index, &[]).map(|_| index));

        if result.is_err() {
            remove_output(path);
        }

        result
    }

    fn open_child<'c>(
        &self,
        partition: &'c PartitionConfig,
        diagnostics: &mut Diagnostics,
    ) -> Result<Child<'c>> {
        let path = partition.index_path();
        let index = match self.sources.filter(|_| self.config.rebuild_children) {
            Some(sources) => rebuild_child(partition, &path, sources, diagnostics)?,
            None => codec::read_index(&path, Variant::Plain)?,
        };
        let last_modified = file_stamp(&path)?.unwrap_or_default();

        Ok(Child {
            config: partition,
            index,
            last_modified,
        })
    }
}

/// Read a partition's index, first rebuilding it from source if it is missing, unreadable or
/// out of date.
///
fn rebuild_child(
    partition: &PartitionConfig,
    path: &Path,
    sources: Sources,
    diagnostics: &mut Diagnostics,
) -> Result<CollectionIndex> {
    match codec::read_index(path, Variant::Plain) {
        Ok(index) => {
            if !sources_changed(&index, sources.inventory, &partition.directory)? {
                return Ok(index);
            }
            debug!(partition = %partition.name, "partition index is out of date");
        }
        Err(err) if err.should_rebuild() => {
            debug!(partition = %partition.name, "partition index is unusable: {err}");
        }
        Err(err) => return Err(err),
    }

    let config = CollectionConfig::new(partition.name.clone(), partition.directory.clone());
    let build = build_collection(&config, sources, diagnostics)?;
    build.save(path)?;

    Ok(build.index)
}

/// The partition with the most variables, the earliest one on ties.
///
/// Using the richest partition as the prototype means a variable missing from some partitions
/// is still part of the merged schema.
///
fn canonical_partition(children: &[Child]) -> usize {
    let mut canonical = 0;
    for (i, child) in children.iter().enumerate() {
        if child.variable_count() > children[canonical].variable_count() {
            canonical = i;
        }
    }

    canonical
}

fn merge_group(
    canonical_group: &Group,
    children: &[Child],
    canonical: usize,
    diagnostics: &mut Diagnostics,
) -> Result<Group> {
    // Each partition's group for this grid, with its index in that partition
    let mut matches = vec![];
    for (p, child) in children.iter().enumerate() {
        match child.index.find_group(canonical_group.gds_hash()) {
            Some((g, group)) => {
                if p == canonical {
                    matches.push(Some((g, group)));
                    continue;
                }
                for variable in group.variables() {
                    if canonical_group.find_variable(variable.cdm_hash()).is_none() {
                        diagnostics.push(Diagnostic::VariableNotInCanonical {
                            partition: child.config.name.clone(),
                            variable: variable.name(),
                            cdm_hash: variable.cdm_hash(),
                        });
                    }
                }
                matches.push(Some((g, group)));
            }
            None => {
                diagnostics.push(Diagnostic::GroupMissingInPartition {
                    partition: child.config.name.clone(),
                    gds_hash: canonical_group.gds_hash(),
                });
                matches.push(None);
            }
        }
    }

    let mut time_coords = Pool::new();
    let mut vert_coords = Pool::new();
    let mut ens_coords = Pool::new();
    let mut time_unions = Pool::new();
    let mut variables = vec![];

    for variable in canonical_group.variables() {
        let name = variable.name();
        let vert = canonical_group.vert_coord(variable);
        let ens = canonical_group.ens_coord(variable);
        let mut locators = vec![None; children.len()];
        let mut times = vec![];

        for (p, found) in matches.iter().enumerate() {
            let (g, group) = match found {
                Some(found) => *found,
                None => continue,
            };
            let partition = &children[p].config.name;
            let (v, other) = match group.find_variable(variable.cdm_hash()) {
                Some(found) => found,
                None => {
                    diagnostics.push(Diagnostic::VariableMissingInPartition {
                        partition: partition.clone(),
                        variable: name.clone(),
                        cdm_hash: variable.cdm_hash(),
                    });
                    continue;
                }
            };

            let mut flags = 0;
            let axes = [
                (
                    compare_axis(vert, group.vert_coord(other), partition, &name, Axis::Vertical)?,
                    Axis::Vertical,
                    PartitionLocator::VERT_DIFFERS,
                ),
                (
                    compare_axis(ens, group.ens_coord(other), partition, &name, Axis::Ensemble)?,
                    Axis::Ensemble,
                    PartitionLocator::ENS_DIFFERS,
                ),
            ];
            for (differs, axis, flag) in axes {
                if differs {
                    flags |= flag;
                    diagnostics.push(Diagnostic::CoordinateMismatchWarning {
                        partition: partition.clone(),
                        variable: name.clone(),
                        axis,
                    });
                }
            }

            if let Some(time) = group.time_coord(other) {
                times.push((p as u32, time));
            }
            locators[p] = Some(PartitionLocator {
                partition: p as u32,
                group: g as u32,
                variable: v as u32,
                flags,
            });
        }

        let (time_idx, union) = match canonical_group.time_coord(variable) {
            Some(canonical_time) => {
                let (union, excluded) = union_time_coords(canonical_time, &times);
                for p in excluded {
                    locators[p as usize] = None;
                    diagnostics.push(Diagnostic::TimeKindMismatch {
                        partition: children[p as usize].config.name.clone(),
                        variable: name.clone(),
                    });
                }
                let time_idx = time_coords.intern(union.coord().clone());
                (Some(time_idx), Some(time_unions.intern(union)))
            }
            None => (None, None),
        };

        let coords_differ = locators
            .iter()
            .flatten()
            .any(|locator| locator.flags != 0);
        let overlay = PartitionOverlay {
            union,
            coords_differ,
            locators,
        };

        variables.push(VariableIndex::new(
            variable.identity().clone(),
            time_idx,
            vert.map(|coord| vert_coords.intern(coord.clone())),
            ens.map(|coord| ens_coords.intern(coord.clone())),
            VariableData::Partitioned(overlay),
        ));
    }

    Group::new(GroupParts {
        gds_hash: canonical_group.gds_hash(),
        gds: canonical_group.gds().to_vec(),
        time_coords,
        vert_coords,
        ens_coords,
        time_unions,
        file_numbers: vec![],
        variables,
    })
}

/// Compare a partition's axis with the canonical one. An axis that exists in only one of them
/// is fatal. Otherwise returns whether both exist with different values.
///
fn compare_axis<T: PartialEq>(
    canonical: Option<&T>,
    other: Option<&T>,
    partition: &str,
    variable: &str,
    axis: Axis,
) -> Result<bool> {
    match (canonical, other) {
        (Some(canonical), Some(other)) => Ok(canonical != other),
        (None, None) => Ok(false),
        _ => Err(Error::CoordinateMismatch {
            partition: partition.to_string(),
            variable: variable.to_string(),
            axis,
        }),
    }
}

/// Remove an output file after a failed build. A file that isn't there is fine.
///
pub(crate) fn remove_output(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed index after failed build"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), "unable to remove index: {err}"),
    }
}

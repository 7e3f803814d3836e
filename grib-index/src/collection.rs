//! The in-memory model of an index: collection, groups, variables and their coordinate pools.
//!
//! Everything here is an immutable snapshot. Builders and the decoder assemble values through
//! the crate-private constructors, which check that every pool reference is valid.
//!
use std::path::{Path, PathBuf};

use crate::{
    cache::Cacheable,
    codec::{self, Variant},
    coord::{EnsCoord, Pool, TimeCoord, VertCoord},
    errors::{Error, Result},
    helpers::Stamp,
    identity::ParamIdentity,
    union::TimeCoordUnion,
};

/// A raw data file that contributes to a collection.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the collection directory
    pub path: String,

    /// Last modification time
    pub modified: Stamp,
}

impl SourceFile {
    pub fn new<S: Into<String>>(path: S, modified: Stamp) -> Self {
        Self {
            path: path.into(),
            modified,
        }
    }
}

/// Originating center, table versions and generating process of a collection's records.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Origin {
    pub center: u16,
    pub subcenter: u16,
    pub master_table: u8,
    pub local_table: u8,
    pub process_type: u8,
    pub process_id: u8,
    pub background_process: u8,
}

/// Location of a variable's records within a plain index's record section
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordPointer {
    pub offset: u64,
    pub length: u64,
}

/// Where a partitioned variable's data lives in one partition's child index.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionLocator {
    pub partition: u32,
    pub group: u32,
    pub variable: u32,
    pub flags: u8,
}

impl PartitionLocator {
    /// The partition's vertical coordinate values differ from the canonical ones
    pub const VERT_DIFFERS: u8 = 0x01;

    /// The partition's ensemble coordinate values differ from the canonical ones
    pub const ENS_DIFFERS: u8 = 0x02;

    pub fn vert_differs(&self) -> bool {
        self.flags & Self::VERT_DIFFERS != 0
    }

    pub fn ens_differs(&self) -> bool {
        self.flags & Self::ENS_DIFFERS != 0
    }
}

/// What a variable of a partitioned collection carries in place of a record pointer.
///
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionOverlay {
    /// Index into the group's pool of time unions
    pub union: Option<usize>,

    /// Some partition's vertical or ensemble values differ from the canonical ones
    pub coords_differ: bool,

    /// One slot per partition. `None` where the partition contributes nothing to this variable.
    pub locators: Vec<Option<PartitionLocator>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum VariableData {
    Plain(RecordPointer),
    Partitioned(PartitionOverlay),
}

/// One parameter within a group.
///
#[derive(Clone, Debug, PartialEq)]
pub struct VariableIndex {
    identity: ParamIdentity,
    cdm_hash: u32,
    time_idx: Option<usize>,
    vert_idx: Option<usize>,
    ens_idx: Option<usize>,
    data: VariableData,

    // Derived from the group's pools when the group is assembled
    ntimes: usize,
    nverts: usize,
    nens: usize,
}

impl VariableIndex {
    pub(crate) fn new(
        identity: ParamIdentity,
        time_idx: Option<usize>,
        vert_idx: Option<usize>,
        ens_idx: Option<usize>,
        data: VariableData,
    ) -> Self {
        let cdm_hash = identity.cdm_hash();
        Self {
            identity,
            cdm_hash,
            time_idx,
            vert_idx,
            ens_idx,
            data,
            ntimes: 0,
            nverts: 0,
            nens: 0,
        }
    }

    pub fn identity(&self) -> &ParamIdentity {
        &self.identity
    }

    pub fn cdm_hash(&self) -> u32 {
        self.cdm_hash
    }

    pub fn name(&self) -> String {
        self.identity.name()
    }

    pub fn time_idx(&self) -> Option<usize> {
        self.time_idx
    }

    pub fn vert_idx(&self) -> Option<usize> {
        self.vert_idx
    }

    pub fn ens_idx(&self) -> Option<usize> {
        self.ens_idx
    }

    pub fn data(&self) -> &VariableData {
        &self.data
    }

    /// The record pointer, for variables of a plain collection
    pub fn record_pointer(&self) -> Option<RecordPointer> {
        match &self.data {
            VariableData::Plain(pointer) => Some(*pointer),
            VariableData::Partitioned(_) => None,
        }
    }

    /// The partition overlay, for variables of a partitioned collection
    pub fn overlay(&self) -> Option<&PartitionOverlay> {
        match &self.data {
            VariableData::Partitioned(overlay) => Some(overlay),
            VariableData::Plain(_) => None,
        }
    }

    /// Number of times. 1 if the variable has no time axis.
    pub fn ntimes(&self) -> usize {
        self.ntimes
    }

    /// Number of vertical levels. 1 if the variable has no vertical axis.
    pub fn nverts(&self) -> usize {
        self.nverts
    }

    /// Number of ensemble members. 1 if the variable has no ensemble axis.
    pub fn nens(&self) -> usize {
        self.nens
    }

    /// Total number of record slots
    pub fn nrecords(&self) -> usize {
        self.ntimes * self.nverts * self.nens
    }

    /// Flat position of a record slot in `[time][vert][ens]` order
    pub fn record_slot(&self, time: usize, vert: usize, ens: usize) -> Option<usize> {
        if time >= self.ntimes || vert >= self.nverts || ens >= self.nens {
            return None;
        }

        Some((time * self.nverts + vert) * self.nens + ens)
    }
}

/// The variables sharing one horizontal coordinate system.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    gds_hash: u32,
    gds: Vec<u8>,
    time_coords: Pool<TimeCoord>,
    vert_coords: Pool<VertCoord>,
    ens_coords: Pool<EnsCoord>,
    time_unions: Pool<TimeCoordUnion>,
    file_numbers: Vec<u32>,
    variables: Vec<VariableIndex>,
}

/// The parts of a group, before references between them are checked
pub(crate) struct GroupParts {
    pub gds_hash: u32,
    pub gds: Vec<u8>,
    pub time_coords: Pool<TimeCoord>,
    pub vert_coords: Pool<VertCoord>,
    pub ens_coords: Pool<EnsCoord>,
    pub time_unions: Pool<TimeCoordUnion>,
    pub file_numbers: Vec<u32>,
    pub variables: Vec<VariableIndex>,
}

impl Group {
    /// Assemble a group, checking every variable's pool references and deriving its counts.
    ///
    pub(crate) fn new(parts: GroupParts) -> Result<Self> {
        let GroupParts {
            gds_hash,
            gds,
            time_coords,
            vert_coords,
            ens_coords,
            time_unions,
            file_numbers,
            mut variables,
        } = parts;

        fn count(len: Option<usize>, name: &str, variable: &VariableIndex) -> Result<usize> {
            len.ok_or_else(|| {
                Error::IndexFormat(format!(
                    "{name} coordinate reference out of range for {}",
                    variable.name()
                ))
            })
        }

        for variable in variables.iter_mut() {
            variable.ntimes = match variable.time_idx {
                Some(i) => count(time_coords.get(i).map(TimeCoord::len), "time", variable)?,
                None => 1,
            };
            variable.nverts = match variable.vert_idx {
                Some(i) => count(vert_coords.get(i).map(VertCoord::len), "vertical", variable)?,
                None => 1,
            };
            variable.nens = match variable.ens_idx {
                Some(i) => count(ens_coords.get(i).map(EnsCoord::len), "ensemble", variable)?,
                None => 1,
            };

            if let VariableData::Partitioned(overlay) = &variable.data {
                if let Some(union) = overlay.union {
                    let union = time_unions.get(union).ok_or_else(|| {
                        Error::IndexFormat(format!(
                            "time union reference out of range for {}",
                            variable.name()
                        ))
                    })?;
                    if Some(union.coord()) != variable.time_idx.and_then(|i| time_coords.get(i)) {
                        return Err(Error::IndexFormat(format!(
                            "time union does not match time coordinate for {}",
                            variable.name()
                        )));
                    }
                }
            }
        }

        Ok(Self {
            gds_hash,
            gds,
            time_coords,
            vert_coords,
            ens_coords,
            time_unions,
            file_numbers,
            variables,
        })
    }

    /// Content hash of the grid definition, unique within a collection
    pub fn gds_hash(&self) -> u32 {
        self.gds_hash
    }

    /// Raw grid definition bytes
    pub fn gds(&self) -> &[u8] {
        &self.gds
    }

    pub fn time_coords(&self) -> &Pool<TimeCoord> {
        &self.time_coords
    }

    pub fn vert_coords(&self) -> &Pool<VertCoord> {
        &self.vert_coords
    }

    pub fn ens_coords(&self) -> &Pool<EnsCoord> {
        &self.ens_coords
    }

    /// Merged time axes with provenance. Empty for groups of a plain collection.
    pub fn time_unions(&self) -> &Pool<TimeCoordUnion> {
        &self.time_unions
    }

    /// Numbers of the collection's source files with records in this group
    pub fn file_numbers(&self) -> &[u32] {
        &self.file_numbers
    }

    pub fn variables(&self) -> &[VariableIndex] {
        &self.variables
    }

    /// Find a variable by identity hash, returning its index in the group
    pub fn find_variable(&self, cdm_hash: u32) -> Option<(usize, &VariableIndex)> {
        self.variables
            .iter()
            .enumerate()
            .find(|(_, variable)| variable.cdm_hash == cdm_hash)
    }

    pub fn time_coord(&self, variable: &VariableIndex) -> Option<&TimeCoord> {
        self.time_coords.get(variable.time_idx?)
    }

    pub fn vert_coord(&self, variable: &VariableIndex) -> Option<&VertCoord> {
        self.vert_coords.get(variable.vert_idx?)
    }

    pub fn ens_coord(&self, variable: &VariableIndex) -> Option<&EnsCoord> {
        self.ens_coords.get(variable.ens_idx?)
    }

    pub fn time_union(&self, variable: &VariableIndex) -> Option<&TimeCoordUnion> {
        self.time_unions.get(variable.overlay()?.union?)
    }
}

/// One sub-collection of a partitioned collection.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub directory: PathBuf,
    pub index_filename: String,

    /// Modification time of the child index when the partitioned index was built
    pub last_modified: Stamp,
}

impl Partition {
    pub fn index_path(&self) -> PathBuf {
        self.directory.join(&self.index_filename)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum IndexKind {
    Plain,
    Partitioned {
        partitions: Vec<Partition>,

        /// When the partitioned index was built
        built: Stamp,
    },
}

/// A child record reached through a partitioned collection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildRecord {
    pub partition: u32,
    pub group: u32,
    pub variable: u32,

    /// Index on the child variable's own time axis
    pub time: u32,
}

/// The persisted metadata for one collection, plain or partitioned.
///
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionIndex {
    pub(crate) name: String,
    pub(crate) directory: PathBuf,
    pub(crate) origin: Origin,
    pub(crate) version: u32,
    pub(crate) files: Vec<SourceFile>,
    pub(crate) groups: Vec<Group>,
    pub(crate) kind: IndexKind,
}

impl CollectionIndex {
    pub(crate) fn new(
        name: String,
        directory: PathBuf,
        origin: Origin,
        files: Vec<SourceFile>,
        groups: Vec<Group>,
        kind: IndexKind,
    ) -> Result<Self> {
        for (i, group) in groups.iter().enumerate() {
            if groups[..i].iter().any(|g| g.gds_hash == group.gds_hash) {
                return Err(Error::IndexFormat(format!(
                    "duplicate grid definition hash {:08x}",
                    group.gds_hash
                )));
            }
            if let Some(&n) = group.file_numbers.iter().find(|&&n| n as usize >= files.len()) {
                return Err(Error::IndexFormat(format!("file number {n} out of range")));
            }
            if let IndexKind::Partitioned { partitions, .. } = &kind {
                let bad = group
                    .variables
                    .iter()
                    .filter_map(VariableIndex::overlay)
                    .any(|overlay| overlay.locators.len() != partitions.len());
                if bad {
                    return Err(Error::IndexFormat(
                        "partition locators don't match partition list".into(),
                    ));
                }
            }
        }

        let variant = match kind {
            IndexKind::Plain => Variant::Plain,
            IndexKind::Partitioned { .. } => Variant::Partitioned,
        };

        Ok(Self {
            name,
            directory,
            origin,
            version: variant.current_version(),
            files,
            groups,
            kind,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Format version this index was read from, or will be written as
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn variant(&self) -> Variant {
        match self.kind {
            IndexKind::Plain => Variant::Plain,
            IndexKind::Partitioned { .. } => Variant::Partitioned,
        }
    }

    pub fn kind(&self) -> &IndexKind {
        &self.kind
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Find a group by grid definition hash, returning its index in the collection
    pub fn find_group(&self, gds_hash: u32) -> Option<(usize, &Group)> {
        self.groups
            .iter()
            .enumerate()
            .find(|(_, group)| group.gds_hash == gds_hash)
    }

    /// Partitions of a partitioned collection. Empty for a plain one.
    pub fn partitions(&self) -> &[Partition] {
        match &self.kind {
            IndexKind::Partitioned { partitions, .. } => partitions,
            IndexKind::Plain => &[],
        }
    }

    /// When a partitioned collection was built
    pub fn built(&self) -> Option<Stamp> {
        match self.kind {
            IndexKind::Partitioned { built, .. } => Some(built),
            IndexKind::Plain => None,
        }
    }

    /// Map a merged time slot of a partitioned variable back to the child record that supplies
    /// it.
    ///
    pub fn locate(&self, group: usize, variable: usize, slot: usize) -> Option<ChildRecord> {
        let group = self.groups.get(group)?;
        let variable = group.variables.get(variable)?;
        let overlay = variable.overlay()?;
        let source = group.time_union(variable)?.resolve(slot)?;
        let locator = (*overlay.locators.get(source.partition as usize)?)?;

        Some(ChildRecord {
            partition: locator.partition,
            group: locator.group,
            variable: locator.variable,
            time: source.index,
        })
    }
}

impl Cacheable for CollectionIndex {
    fn size(&self) -> u64 {
        codec::encode_header(self, codec::Layout::Current)
            .map(|header| header.len() as u64)
            .unwrap_or(0)
    }
}

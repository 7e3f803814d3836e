//! Building the index of a single collection from its raw data files.
//!
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{
    codec,
    collection::{
        CollectionIndex, Group, GroupParts, IndexKind, Origin, RecordPointer, SourceFile,
        VariableData, VariableIndex,
    },
    coord::{Axis, EnsCoord, Pool, TimeCoord, TimeKind, TimeValue, VertCoord},
    diagnostics::{Diagnostic, Diagnostics},
    errors::{Error, Result},
    extio::ExtendedWrite,
    helpers::content_hash,
    identity::ParamIdentity,
    session::{MISSING_FILE, RECORD_SIZE},
    source::{CustomizerSource, DecodedFile, DecodedRecord, Sources, TableCustomizer},
};

/// Where a single collection lives.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionConfig {
    pub name: String,
    pub directory: PathBuf,
}

impl CollectionConfig {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(name: S, directory: P) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
        }
    }
}

/// The product of building a plain collection: its index and the record section that goes with
/// it.
///
pub struct Build {
    pub index: CollectionIndex,
    pub records: Vec<u8>,

    /// Records written to the record section
    pub record_count: usize,

    /// Record slots with no record
    pub missing: usize,

    /// Records dropped because they disagreed with their variable's axes
    pub dropped: usize,

    /// Records replaced by a later record with the same coordinates
    pub duplicates: usize,
}

impl Build {
    /// Write the index and its records to `path`.
    ///
    pub fn save(&self, path: &Path) -> Result<()> {
        codec::write_index(path, &self.index, &self.records)
    }
}

/// Build the index of a collection: list its files, decode each one, and assemble the result.
///
/// Decoder and inventory failures are fatal. Problems with individual records end up in
/// `diagnostics`.
///
pub fn build_collection(
    config: &CollectionConfig,
    sources: Sources,
    diagnostics: &mut Diagnostics,
) -> Result<Build> {
    let files = sources.inventory.files(&config.directory)?;
    debug!(collection = %config.name, files = files.len(), "building collection");

    let mut builder = CollectionBuilder::new(config);
    for file in files {
        let decoded = sources
            .decoder
            .decode(&config.directory, &file, builder.next_file_number())?;
        builder.push_file(file, decoded, diagnostics);
    }

    builder.finish(sources.tables, diagnostics)
}

struct PendingRecord {
    time: TimeValue,
    vert: Option<(f64, f64)>,
    ens: Option<(i32, i32)>,
    file: u32,
    offset: u64,
}

struct VariableBuilder {
    identity: ParamIdentity,
    time_unit: u16,
    time_kind: TimeKind,
    has_vert: bool,
    has_ens: bool,
    records: Vec<PendingRecord>,
}

impl VariableBuilder {
    fn new(record: &DecodedRecord) -> Self {
        Self {
            identity: record.param.clone(),
            time_unit: record.time_unit,
            time_kind: record.time.kind(),
            has_vert: record.vert.is_some(),
            has_ens: record.ens.is_some(),
            records: vec![],
        }
    }

    /// The first axis on which `record` disagrees with this variable, if any
    fn inconsistency(&self, record: &DecodedRecord) -> Option<Axis> {
        if record.time.kind() != self.time_kind || record.time_unit != self.time_unit {
            Some(Axis::Time)
        } else if record.vert.is_some() != self.has_vert {
            Some(Axis::Vertical)
        } else if record.ens.is_some() != self.has_ens {
            Some(Axis::Ensemble)
        } else {
            None
        }
    }
}

struct GroupBuilder {
    gds_hash: u32,
    gds: Vec<u8>,
    variables: Vec<VariableBuilder>,
    by_hash: HashMap<u32, usize>,
    files: BTreeSet<u32>,
}

/// Accumulates decoded files and produces an immutable `Build`.
///
/// Groups and variables keep the order in which they first appear.
///
pub struct CollectionBuilder {
    name: String,
    directory: PathBuf,
    origin: Option<Origin>,
    files: Vec<SourceFile>,
    groups: Vec<GroupBuilder>,
    by_hash: HashMap<u32, usize>,
    dropped: usize,
}

impl CollectionBuilder {
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            name: config.name.clone(),
            directory: config.directory.clone(),
            origin: None,
            files: vec![],
            groups: vec![],
            by_hash: HashMap::new(),
            dropped: 0,
        }
    }

    /// The number the next pushed file will get
    pub fn next_file_number(&self) -> u32 {
        self.files.len() as u32
    }

    /// Add a decoded file. Records must carry `next_file_number()` as their file number.
    ///
    pub fn push_file(
        &mut self,
        file: SourceFile,
        decoded: DecodedFile,
        diagnostics: &mut Diagnostics,
    ) {
        match self.origin {
            None => self.origin = Some(decoded.origin),
            Some(origin) if origin != decoded.origin => {
                diagnostics.push(Diagnostic::OriginMismatch {
                    file: file.path.clone(),
                });
            }
            Some(_) => {}
        }

        for record in decoded.records {
            self.push_record(&file, record, diagnostics);
        }
        self.files.push(file);
    }

    fn push_record(
        &mut self,
        file: &SourceFile,
        record: DecodedRecord,
        diagnostics: &mut Diagnostics,
    ) {
        let gds_hash = content_hash(&record.gds);
        let groups = &mut self.groups;
        let group_index = *self.by_hash.entry(gds_hash).or_insert_with(|| {
            groups.push(GroupBuilder {
                gds_hash,
                gds: record.gds.clone(),
                variables: vec![],
                by_hash: HashMap::new(),
                files: BTreeSet::new(),
            });
            groups.len() - 1
        });
        let group = &mut self.groups[group_index];

        let cdm_hash = record.param.cdm_hash();
        let variables = &mut group.variables;
        let variable_index = *group.by_hash.entry(cdm_hash).or_insert_with(|| {
            variables.push(VariableBuilder::new(&record));
            variables.len() - 1
        });
        let variable = &mut group.variables[variable_index];

        if let Some(axis) = variable.inconsistency(&record) {
            diagnostics.push(Diagnostic::InconsistentRecord {
                file: file.path.clone(),
                variable: variable.identity.name(),
                axis,
            });
            self.dropped += 1;
            return;
        }

        group.files.insert(record.file);
        variable.records.push(PendingRecord {
            time: record.time,
            vert: record.vert,
            ens: record.ens,
            file: record.file,
            offset: record.offset,
        });
    }

    /// Freeze everything pushed so far into a `Build`.
    ///
    /// The table customizer is looked up once, from the collection's origin, and supplies the
    /// units of every coordinate.
    ///
    pub fn finish(
        self,
        tables: &dyn CustomizerSource,
        diagnostics: &mut Diagnostics,
    ) -> Result<Build> {
        if self.groups.is_empty() {
            return Err(Error::NoSourceFiles(self.name));
        }

        let origin = self.origin.unwrap_or_default();
        let customizer = tables.customizer(&origin);

        let mut records = vec![];
        let mut stats = Stats::default();
        let mut groups = vec![];
        for group in self.groups {
            groups.push(finish_group(
                group,
                customizer.as_ref(),
                &self.files,
                &mut records,
                &mut stats,
                diagnostics,
            )?);
        }

        let index = CollectionIndex::new(
            self.name,
            self.directory,
            origin,
            self.files,
            groups,
            IndexKind::Plain,
        )?;

        info!(
            collection = %index.name(),
            files = index.files().len(),
            groups = index.groups().len(),
            records = stats.written,
            missing = stats.missing,
            "built collection"
        );

        Ok(Build {
            index,
            records,
            record_count: stats.written,
            missing: stats.missing,
            dropped: self.dropped,
            duplicates: stats.duplicates,
        })
    }
}

#[derive(Default)]
struct Stats {
    written: usize,
    missing: usize,
    duplicates: usize,
}

fn finish_group(
    group: GroupBuilder,
    customizer: &dyn TableCustomizer,
    files: &[SourceFile],
    records: &mut Vec<u8>,
    stats: &mut Stats,
    diagnostics: &mut Diagnostics,
) -> Result<Group> {
    let mut time_coords = Pool::new();
    let mut vert_coords = Pool::new();
    let mut ens_coords = Pool::new();
    let mut variables = vec![];

    for variable in group.variables {
        let name = variable.identity.name();
        let times: Vec<TimeValue> = variable.records.iter().map(|r| r.time).collect();
        let time_unit = customizer
            .time_unit(variable.time_unit)
            .unwrap_or("unknown");
        let time = TimeCoord::from_values(variable.time_unit, time_unit, &times).ok_or_else(
            || Error::IndexFormat(format!("variable {name} has no consistent time axis")),
        )?;

        let vert = variable.has_vert.then(|| {
            let identity = &variable.identity;
            VertCoord::new(
                identity.level_type,
                customizer.level_unit(identity.level_type).unwrap_or(""),
                identity.is_layer,
                variable.records.iter().filter_map(|r| r.vert).collect(),
            )
        });
        let ens = variable
            .has_ens
            .then(|| EnsCoord::new(variable.records.iter().filter_map(|r| r.ens).collect()));

        let nverts = vert.as_ref().map_or(1, VertCoord::len);
        let nens = ens.as_ref().map_or(1, EnsCoord::len);
        let mut slots: Vec<Option<(u32, u64)>> = vec![None; time.len() * nverts * nens];
        for record in &variable.records {
            let t = time.position(record.time);
            let v = match (&vert, record.vert) {
                (Some(coord), Some(level)) => coord.position(level),
                _ => Some(0),
            };
            let e = match (&ens, record.ens) {
                (Some(coord), Some(member)) => coord.position(member),
                _ => Some(0),
            };
            let (t, v, e) = match (t, v, e) {
                (Some(t), Some(v), Some(e)) => (t, v, e),
                _ => continue,
            };

            let slot = &mut slots[(t * nverts + v) * nens + e];
            if slot.is_some() {
                let file = files
                    .get(record.file as usize)
                    .map_or_else(|| record.file.to_string(), |f| f.path.clone());
                diagnostics.push(Diagnostic::DuplicateRecord {
                    file,
                    variable: name.clone(),
                });
                stats.duplicates += 1;
            }
            *slot = Some((record.file, record.offset));
        }

        let pointer = RecordPointer {
            offset: records.len() as u64,
            length: slots.len() as u64 * RECORD_SIZE,
        };
        for slot in slots {
            let (file, offset) = match slot {
                Some(slot) => {
                    stats.written += 1;
                    slot
                }
                None => {
                    stats.missing += 1;
                    (MISSING_FILE, 0)
                }
            };
            records.write_u32(file)?;
            records.write_u64(offset)?;
        }

        let time_idx = time_coords.intern(time);
        let vert_idx = vert.map(|coord| vert_coords.intern(coord));
        let ens_idx = ens.map(|coord| ens_coords.intern(coord));
        variables.push(VariableIndex::new(
            variable.identity,
            Some(time_idx),
            vert_idx,
            ens_idx,
            VariableData::Plain(pointer),
        ));
    }

    Group::new(GroupParts {
        gds_hash: group.gds_hash,
        gds: group.gds,
        time_coords,
        vert_coords,
        ens_coords,
        time_unions: Pool::new(),
        file_numbers: group.files.into_iter().collect(),
        variables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, gds, precip, record, tmp, MemoryInventory, ScriptedDecoder};
    use crate::source::StandardTables;

    #[test]
    fn test_build() -> Result<()> {
        let build = testing::sample_build()?;
        let index = &build.index;
        assert_eq!(index.name(), "day1");
        assert_eq!(index.files().len(), 2);
        assert_eq!(index.groups().len(), 1);

        let group = &index.groups()[0];
        assert_eq!(group.gds_hash(), content_hash(&gds(1)));
        assert_eq!(group.file_numbers(), &[0, 1]);
        assert_eq!(group.variables().len(), 2);

        let (_, variable) = group.find_variable(tmp().cdm_hash()).unwrap();
        let time = group.time_coord(variable).unwrap();
        assert_eq!(time.unit, "hours");
        assert_eq!(time.len(), 4);
        let vert = group.vert_coord(variable).unwrap();
        assert_eq!(vert.unit, "Pa");
        assert_eq!(vert.len(), 2);
        assert_eq!(variable.nrecords(), 8);

        let (_, precip) = group.find_variable(precip().cdm_hash()).unwrap();
        assert!(group.vert_coord(precip).is_none());
        assert_eq!(precip.nrecords(), 4);

        assert_eq!(build.record_count, 12);
        assert_eq!(build.missing, 0);
        assert_eq!(build.records.len(), 12 * RECORD_SIZE as usize);

        Ok(())
    }

    #[test]
    fn test_time_pool_shared() -> Result<()> {
        let build = testing::sample_build()?;
        let group = &build.index.groups()[0];

        // TMP has instantaneous times, PRECIP accumulations
        assert_eq!(group.time_coords().len(), 2);
        let (_, tmp) = group.find_variable(tmp().cdm_hash()).unwrap();
        let (_, precip) = group.find_variable(precip().cdm_hash()).unwrap();
        assert_eq!(group.time_coord(tmp).unwrap().kind(), TimeKind::Point);
        assert_eq!(group.time_coord(precip).unwrap().kind(), TimeKind::Interval);

        Ok(())
    }

    #[test]
    fn test_missing_records() -> Result<()> {
        let inventory = MemoryInventory::new(&[("a.grb2", 10)]);
        let decoder = ScriptedDecoder::new().with_file(
            "a.grb2",
            vec![
                record(1, tmp(), 0, Some(85000.0), 0),
                record(1, tmp(), 6, Some(50000.0), 100),
            ],
        );
        let sources = Sources {
            inventory: &inventory,
            decoder: &decoder,
            tables: &StandardTables,
        };
        let mut diagnostics = Diagnostics::new();
        let build = build_collection(
            &CollectionConfig::new("sparse", "/data/sparse"),
            sources,
            &mut diagnostics,
        )?;

        assert_eq!(build.record_count, 2);
        assert_eq!(build.missing, 2);
        assert!(diagnostics.is_empty());

        Ok(())
    }

    #[test]
    fn test_duplicate_keeps_later() -> Result<()> {
        let inventory = MemoryInventory::new(&[("a.grb2", 10), ("b.grb2", 20)]);
        let decoder = ScriptedDecoder::new()
            .with_file("a.grb2", vec![record(1, tmp(), 0, Some(85000.0), 0)])
            .with_file("b.grb2", vec![record(1, tmp(), 0, Some(85000.0), 500)]);
        let sources = Sources {
            inventory: &inventory,
            decoder: &decoder,
            tables: &StandardTables,
        };
        let mut diagnostics = Diagnostics::new();
        let build = build_collection(
            &CollectionConfig::new("dup", "/data/dup"),
            sources,
            &mut diagnostics,
        )?;

        assert_eq!(build.duplicates, 1);
        assert_eq!(build.record_count, 1);
        assert!(matches!(
            diagnostics.entries(),
            [Diagnostic::DuplicateRecord { file, .. }] if file == "b.grb2"
        ));

        // file 1, offset 500
        let mut expected = 1_u32.to_be_bytes().to_vec();
        expected.extend_from_slice(&500_u64.to_be_bytes());
        assert_eq!(build.records, expected);

        Ok(())
    }

    #[test]
    fn test_inconsistent_record_dropped() -> Result<()> {
        let inventory = MemoryInventory::new(&[("a.grb2", 10)]);
        let decoder = ScriptedDecoder::new().with_file(
            "a.grb2",
            vec![
                record(1, tmp(), 0, Some(85000.0), 0),
                record(1, tmp(), 6, None, 100),
            ],
        );
        let sources = Sources {
            inventory: &inventory,
            decoder: &decoder,
            tables: &StandardTables,
        };
        let mut diagnostics = Diagnostics::new();
        let build = build_collection(
            &CollectionConfig::new("bad", "/data/bad"),
            sources,
            &mut diagnostics,
        )?;

        assert_eq!(build.dropped, 1);
        assert_eq!(build.record_count, 1);
        assert!(matches!(
            diagnostics.entries(),
            [Diagnostic::InconsistentRecord {
                axis: Axis::Vertical,
                ..
            }]
        ));

        Ok(())
    }

    #[test]
    fn test_groups_by_grid() -> Result<()> {
        let inventory = MemoryInventory::new(&[("a.grb2", 10)]);
        let decoder = ScriptedDecoder::new().with_file(
            "a.grb2",
            vec![
                record(2, tmp(), 0, Some(85000.0), 0),
                record(1, tmp(), 0, Some(85000.0), 100),
                record(2, precip(), 0, None, 200),
            ],
        );
        let sources = Sources {
            inventory: &inventory,
            decoder: &decoder,
            tables: &StandardTables,
        };
        let build = build_collection(
            &CollectionConfig::new("grids", "/data/grids"),
            sources,
            &mut Diagnostics::new(),
        )?;

        let groups = build.index.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].gds(), gds(2).as_slice());
        assert_eq!(groups[0].variables().len(), 2);
        assert_eq!(groups[1].gds(), gds(1).as_slice());
        assert_eq!(groups[1].variables().len(), 1);

        Ok(())
    }

    #[test]
    fn test_origin_mismatch() -> Result<()> {
        let inventory = MemoryInventory::new(&[("a.grb2", 10), ("b.grb2", 20)]);
        let other = Origin {
            center: 98,
            ..Origin::default()
        };
        let decoder = ScriptedDecoder::new()
            .with_file("a.grb2", vec![record(1, tmp(), 0, Some(85000.0), 0)])
            .with_file_from("b.grb2", other, vec![record(1, tmp(), 6, Some(85000.0), 0)]);
        let sources = Sources {
            inventory: &inventory,
            decoder: &decoder,
            tables: &StandardTables,
        };
        let mut diagnostics = Diagnostics::new();
        let build = build_collection(
            &CollectionConfig::new("mixed", "/data/mixed"),
            sources,
            &mut diagnostics,
        )?;

        assert_eq!(build.index.origin(), testing::origin());
        assert!(matches!(
            diagnostics.entries(),
            [Diagnostic::OriginMismatch { file }] if file == "b.grb2"
        ));

        Ok(())
    }

    #[test]
    fn test_no_source_files() {
        let inventory = MemoryInventory::new(&[]);
        let decoder = ScriptedDecoder::new();
        let sources = Sources {
            inventory: &inventory,
            decoder: &decoder,
            tables: &StandardTables,
        };
        let result = build_collection(
            &CollectionConfig::new("empty", "/data/empty"),
            sources,
            &mut Diagnostics::new(),
        );

        assert!(matches!(result, Err(Error::NoSourceFiles(name)) if name == "empty"));
    }

    #[test]
    fn test_decoder_failure_is_fatal() {
        let inventory = MemoryInventory::new(&[("a.grb2", 10)]);
        let decoder = ScriptedDecoder::new();
        let sources = Sources {
            inventory: &inventory,
            decoder: &decoder,
            tables: &StandardTables,
        };
        let result = build_collection(
            &CollectionConfig::new("broken", "/data/broken"),
            sources,
            &mut Diagnostics::new(),
        );

        assert!(matches!(result, Err(Error::Io(_))));
    }
}

//! Fixtures shared by the unit tests: an in-memory file inventory, a scripted decoder and a few
//! canned collections.
//!
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::{
    build::{build_collection, Build, CollectionConfig},
    collection::{Origin, SourceFile},
    coord::TimeValue,
    diagnostics::Diagnostics,
    errors::{Error, Result},
    helpers::Stamp,
    identity::ParamIdentity,
    partition::PartitionConfig,
    source::{
        DecodedFile, DecodedRecord, FileInventory, RecordDecoder, Sources, StandardTables,
    },
};

/// Levels used for parameters on isobaric surfaces
pub(crate) static LEVELS: [f64; 2] = [85000.0, 50000.0];

/// Ensemble members as (member, derived type)
pub(crate) static MEMBERS: [(i32, i32); 2] = [(1, 0), (2, 0)];

/// Temperature on isobaric surfaces
pub(crate) fn tmp() -> ParamIdentity {
    ParamIdentity::new(0, 0, 0, 100)
}

/// Six hour accumulated precipitation at the surface
pub(crate) fn precip() -> ParamIdentity {
    ParamIdentity {
        interval_type: 1,
        interval_name: String::from("6 Hour"),
        ..ParamIdentity::new(0, 1, 8, 1)
    }
}

/// Relative humidity on isobaric surfaces
pub(crate) fn rh() -> ParamIdentity {
    ParamIdentity::new(0, 1, 1, 100)
}

pub(crate) fn origin() -> Origin {
    Origin {
        center: 7,
        subcenter: 0,
        master_table: 2,
        local_table: 1,
        process_type: 2,
        process_id: 96,
        background_process: 0,
    }
}

/// A fake grid definition. Different `n` make different grids.
pub(crate) fn gds(n: u8) -> Vec<u8> {
    vec![0, 0, 0x0a, 0x3d, 0x6f, 0, 0, 0, 6, n, 0, 0, 0x05, 0xa0, 0, 0, 0x02, 0xd1]
}

/// A record of `param` at `hour`, on grid `gds(grid)`. Accumulations cover the six hours from
/// `hour`.
///
pub(crate) fn record(
    grid: u8,
    param: ParamIdentity,
    hour: i32,
    level: Option<f64>,
    offset: u64,
) -> DecodedRecord {
    let time = if param.interval_type >= 0 {
        TimeValue::Interval(hour, hour + 6)
    } else {
        TimeValue::Point(hour)
    };

    DecodedRecord {
        gds: gds(grid),
        param,
        time,
        time_unit: 1,
        vert: level.map(|level| (level, level)),
        ens: None,
        file: 0,
        offset,
    }
}

/// A `FileInventory` that serves canned file lists.
///
#[derive(Default)]
pub(crate) struct MemoryInventory {
    files: Option<Vec<SourceFile>>,
    directories: HashMap<PathBuf, Vec<SourceFile>>,
}

impl MemoryInventory {
    /// Serve `files` for any directory
    pub(crate) fn new(files: &[(&str, Stamp)]) -> Self {
        Self {
            files: Some(source_files(files)),
            directories: HashMap::new(),
        }
    }

    /// Fail for every directory not added with `with_directory`
    pub(crate) fn unavailable() -> Self {
        Self::default()
    }

    pub(crate) fn with_directory<P: Into<PathBuf>>(
        mut self,
        directory: P,
        files: &[(&str, Stamp)],
    ) -> Self {
        self.directories
            .insert(directory.into(), source_files(files));
        self
    }
}

fn source_files(files: &[(&str, Stamp)]) -> Vec<SourceFile> {
    files
        .iter()
        .map(|&(path, modified)| SourceFile::new(path, modified))
        .collect()
}

impl FileInventory for MemoryInventory {
    fn files(&self, directory: &Path) -> Result<Vec<SourceFile>> {
        match self.directories.get(directory).or(self.files.as_ref()) {
            Some(files) => Ok(files.clone()),
            None => Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such directory: {}", directory.display()),
            ))),
        }
    }
}

/// A `RecordDecoder` that returns canned records by file name.
///
#[derive(Default)]
pub(crate) struct ScriptedDecoder {
    files: HashMap<String, DecodedFile>,
}

impl ScriptedDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_file(self, path: &str, records: Vec<DecodedRecord>) -> Self {
        self.with_file_from(path, origin(), records)
    }

    pub(crate) fn with_file_from(
        mut self,
        path: &str,
        origin: Origin,
        records: Vec<DecodedRecord>,
    ) -> Self {
        self.files
            .insert(String::from(path), DecodedFile { origin, records });
        self
    }
}

impl RecordDecoder for ScriptedDecoder {
    fn decode(
        &self,
        _directory: &Path,
        file: &SourceFile,
        file_number: u32,
    ) -> Result<DecodedFile> {
        let mut decoded = self.files.get(&file.path).cloned().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unable to decode {}", file.path),
            ))
        })?;
        for record in decoded.records.iter_mut() {
            record.file = file_number;
        }

        Ok(decoded)
    }
}

/// One parameter of a canned collection, with its vertical levels and ensemble members. No
/// levels means no vertical axis, no members no ensemble axis.
///
pub(crate) struct Field<'a> {
    pub param: ParamIdentity,
    pub levels: &'a [f64],
    pub members: &'a [(i32, i32)],
}

impl<'a> Field<'a> {
    pub(crate) fn new(param: ParamIdentity, levels: &'a [f64]) -> Self {
        Self {
            param,
            levels,
            members: &[],
        }
    }

    pub(crate) fn with_members(self, members: &'a [(i32, i32)]) -> Self {
        Self { members, ..self }
    }

    /// Every (level, member) combination of this field
    fn slots(&self) -> Vec<(Option<f64>, Option<(i32, i32)>)> {
        let levels: Vec<Option<f64>> = match self.levels {
            [] => vec![None],
            levels => levels.iter().copied().map(Some).collect(),
        };
        let members: Vec<Option<(i32, i32)>> = match self.members {
            [] => vec![None],
            members => members.iter().copied().map(Some).collect(),
        };

        levels
            .iter()
            .flat_map(|&level| members.iter().map(move |&member| (level, member)))
            .collect()
    }
}

/// The usual fields: TMP on two isobaric levels and surface PRECIP
pub(crate) fn fields() -> Vec<Field<'static>> {
    vec![Field::new(tmp(), &LEVELS), Field::new(precip(), &[])]
}

/// Inventory and decoder for a canned collection. Each entry of `files` is a file name and the
/// forecast hours it holds. Every file holds every field at each of its hours.
///
pub(crate) fn canned_sources(
    files: &[(&str, &[i32])],
    fields: &[Field],
    modified: Stamp,
) -> (MemoryInventory, ScriptedDecoder) {
    let names: Vec<(&str, Stamp)> = files.iter().map(|&(name, _)| (name, modified)).collect();
    let inventory = MemoryInventory::new(&names);

    let mut decoder = ScriptedDecoder::new();
    for &(name, hours) in files {
        let mut records = vec![];
        for &hour in hours {
            for field in fields {
                for (level, member) in field.slots() {
                    let offset = records.len() as u64 * 1000;
                    let mut decoded = record(1, field.param.clone(), hour, level, offset);
                    decoded.ens = member;
                    records.push(decoded);
                }
            }
        }
        decoder = decoder.with_file(name, records);
    }

    (inventory, decoder)
}

/// Build a canned collection.
///
pub(crate) fn canned_build(
    name: &str,
    directory: &Path,
    files: &[(&str, &[i32])],
    fields: &[Field],
) -> Result<Build> {
    let (inventory, decoder) = canned_sources(files, fields, 1000);
    let sources = Sources {
        inventory: &inventory,
        decoder: &decoder,
        tables: &StandardTables,
    };

    build_collection(
        &CollectionConfig::new(name, directory),
        sources,
        &mut Diagnostics::new(),
    )
}

/// One day of GFS-like output in two files: hours 0 and 6, then 12 and 18.
///
pub(crate) fn sample_build() -> Result<Build> {
    canned_build(
        "day1",
        Path::new("/data/day1"),
        &[("a.grb2", &[0, 6]), ("b.grb2", &[12, 18])],
        &fields(),
    )
}

/// Build a canned partition under `root` and write its index. The partition has one source file
/// holding all of `hours`.
///
pub(crate) fn write_partition(
    root: &Path,
    name: &str,
    hours: &[i32],
    fields: &[Field],
) -> Result<PartitionConfig> {
    let partition = PartitionConfig::new(name, root.join(name), format!("{name}.gbx"));
    fs::create_dir_all(&partition.directory)?;

    let file = format!("{name}.grb2");
    let build = canned_build(name, &partition.directory, &[(&file, hours)], fields)?;
    build.save(&partition.index_path())?;

    Ok(partition)
}

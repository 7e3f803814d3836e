//! The collaborators an index is built from: a file inventory, a record decoder and the tables
//! that supply units.
//!
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::{
    collection::{Origin, SourceFile},
    coord::TimeValue,
    errors::Result,
    helpers::to_stamp,
    identity::ParamIdentity,
};

/// One record of a raw data file, already decoded.
///
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedRecord {
    /// Raw grid definition. Records with equal definitions share a group.
    pub gds: Vec<u8>,

    pub param: ParamIdentity,

    pub time: TimeValue,

    /// Time unit code of `time`
    pub time_unit: u16,

    /// Vertical level as (value, bound), if the parameter has a vertical axis
    pub vert: Option<(f64, f64)>,

    /// Ensemble member as (member, derived type), if the parameter has an ensemble axis
    pub ens: Option<(i32, i32)>,

    /// Number of the file in the collection's file list
    pub file: u32,

    /// Byte offset of the record in its file
    pub offset: u64,
}

/// All records decoded from one raw data file.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedFile {
    pub origin: Origin,
    pub records: Vec<DecodedRecord>,
}

/// Decodes raw data files into records.
///
/// All knowledge of the raw format, including edition specific details, lives behind this trait.
///
pub trait RecordDecoder {
    /// Decode a file from a collection directory. `file_number` is the file's position in the
    /// collection's file list and should be copied into every record.
    ///
    fn decode(&self, directory: &Path, file: &SourceFile, file_number: u32)
        -> Result<DecodedFile>;
}

/// Lists the raw data files of a collection directory.
///
pub trait FileInventory {
    /// List source files in `directory`, in a stable order, with their modification stamps.
    ///
    fn files(&self, directory: &Path) -> Result<Vec<SourceFile>>;
}

/// Center specific table lookups.
///
pub trait TableCustomizer: Send + Sync {
    /// Unit of the values of a vertical level type, eg "Pa" for isobaric surfaces
    fn level_unit(&self, level_type: u16) -> Option<&str>;

    /// Name of a time unit code, eg "hours"
    fn time_unit(&self, code: u16) -> Option<&str>;
}

/// Supplies the customizer for a collection's originating center and tables.
///
/// Looked up once per collection, when the collection's origin is known.
///
pub trait CustomizerSource {
    fn customizer(&self, origin: &Origin) -> Arc<dyn TableCustomizer>;
}

/// The collaborators needed to build a collection from its raw files.
///
#[derive(Clone, Copy)]
pub struct Sources<'a> {
    pub inventory: &'a dyn FileInventory,
    pub decoder: &'a dyn RecordDecoder,
    pub tables: &'a dyn CustomizerSource,
}

/// WMO standard tables, with no local overrides.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardTables;

impl TableCustomizer for StandardTables {
    fn level_unit(&self, level_type: u16) -> Option<&str> {
        let unit = match level_type {
            20 => "K",
            100 | 108 => "Pa",
            102 | 103 | 106 => "m",
            104 | 105 | 111 => "",
            107 => "K",
            109 => "K m2 kg-1 s-1",
            114 => "K",
            117 => "m",
            160 => "m",
            _ => return None,
        };

        Some(unit)
    }

    fn time_unit(&self, code: u16) -> Option<&str> {
        let unit = match code {
            0 => "minutes",
            1 => "hours",
            2 => "days",
            3 => "months",
            4 => "years",
            10 => "3 hours",
            11 => "6 hours",
            12 => "12 hours",
            13 => "seconds",
            _ => return None,
        };

        Some(unit)
    }
}

impl CustomizerSource for StandardTables {
    fn customizer(&self, _origin: &Origin) -> Arc<dyn TableCustomizer> {
        Arc::new(StandardTables)
    }
}

/// A `FileInventory` over the local file system.
///
/// Lists the regular files of a directory, optionally only those with a given extension, sorted
/// by name.
///
#[derive(Clone, Debug, Default)]
pub struct DirectoryInventory {
    extension: Option<String>,
}

impl DirectoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension<S: Into<String>>(extension: S) -> Self {
        Self {
            extension: Some(extension.into()),
        }
    }
}

impl FileInventory for DirectoryInventory {
    fn files(&self, directory: &Path) -> Result<Vec<SourceFile>> {
        let mut files = vec![];
        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            let path = entry.path();
            if let Some(extension) = &self.extension {
                if path.extension().and_then(|e| e.to_str()) != Some(extension.as_str()) {
                    continue;
                }
            }

            let name = entry.file_name().into_string().map_err(|name| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("file name is not UTF-8: {name:?}"),
                )
            })?;
            files.push(SourceFile::new(name, to_stamp(metadata.modified()?)));
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(files)
    }
}

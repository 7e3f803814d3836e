//! Lazy access to the record section of a plain index.
//!
//! Opening a session reads only the header. Records are read on demand, one variable at a time,
//! from the still open index file.
//!
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{
    codec::{self, Variant},
    collection::{CollectionIndex, VariableIndex},
    errors::{Error, Result},
    extio::ExtendedRead,
};

/// Size in bytes of one entry in the record section: a 4 byte file number and an 8 byte offset.
///
pub const RECORD_SIZE: u64 = 12;

/// File number of an empty record slot
pub(crate) const MISSING_FILE: u32 = u32::MAX;

/// Location of one record in a collection's source files.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record {
    /// Index into the collection's file list
    pub file: u32,

    /// Byte offset of the record in its file
    pub offset: u64,
}

/// An open plain index.
///
pub struct RecordSession {
    path: PathBuf,
    index: CollectionIndex,
    file: File,
    record_start: u64,
    record_len: u64,
}

impl RecordSession {
    pub fn open(path: &Path) -> Result<Self> {
        let opened = codec::open(path, Variant::Plain)?;

        Ok(Self {
            path: PathBuf::from(path),
            index: opened.index,
            file: opened.file,
            record_start: opened.record_start,
            record_len: opened.record_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &CollectionIndex {
        &self.index
    }

    /// Read every record slot of a variable, in `[time][vert][ens]` order. Empty slots are
    /// `None`.
    ///
    pub fn records(&mut self, group: usize, variable: usize) -> Result<Vec<Option<Record>>> {
        let variable = self.variable(group, variable)?;
        let pointer = variable.record_pointer().ok_or_else(|| {
            Error::IndexFormat(format!("variable {} has no record pointer", variable.name()))
        })?;
        let expected = variable.nrecords() as u64 * RECORD_SIZE;
        if pointer.length != expected {
            return Err(Error::IndexFormat(format!(
                "variable {} has {} bytes of records, expected {expected}",
                variable.name(),
                pointer.length
            )));
        }
        self.check_bounds(pointer.offset, pointer.length)?;

        self.file
            .seek(SeekFrom::Start(self.record_start + pointer.offset))?;
        let mut stream = BufReader::new((&self.file).take(pointer.length));
        let mut records = Vec::with_capacity((pointer.length / RECORD_SIZE) as usize);
        for _ in 0..pointer.length / RECORD_SIZE {
            records.push(read_record(&mut stream)?);
        }

        Ok(records)
    }

    /// Read a single record slot. `None` if the slot is empty or the coordinates are out of
    /// range.
    ///
    pub fn record(
        &mut self,
        group: usize,
        variable: usize,
        time: usize,
        vert: usize,
        ens: usize,
    ) -> Result<Option<Record>> {
        let index = self.variable(group, variable)?;
        let pointer = index.record_pointer().ok_or_else(|| {
            Error::IndexFormat(format!("variable {} has no record pointer", index.name()))
        })?;
        let slot = match index.record_slot(time, vert, ens) {
            Some(slot) => slot as u64,
            None => return Ok(None),
        };

        self.check_bounds(pointer.offset, pointer.length)?;
        let start = slot
            .checked_mul(RECORD_SIZE)
            .filter(|&start| pointer.length.checked_sub(start) >= Some(RECORD_SIZE))
            .ok_or_else(|| {
                Error::IndexFormat(format!(
                    "record slot {slot} outside of variable {}",
                    index.name()
                ))
            })?;

        // In bounds: offset + length fits in the record section
        let offset = pointer.offset + start;
        self.file.seek(SeekFrom::Start(self.record_start + offset))?;
        let mut stream = (&self.file).take(RECORD_SIZE);

        read_record(&mut stream)
    }

    /// Close the session, returning the index it read.
    ///
    pub fn close(self) -> CollectionIndex {
        self.index
    }

    fn variable(&self, group: usize, variable: usize) -> Result<&VariableIndex> {
        self.index
            .groups()
            .get(group)
            .and_then(|g| g.variables().get(variable))
            .ok_or_else(|| {
                Error::IndexFormat(format!("no variable {variable} in group {group}"))
            })
    }

    fn check_bounds(&self, offset: u64, length: u64) -> Result<()> {
        match offset.checked_add(length) {
            Some(end) if end <= self.record_len => Ok(()),
            _ => Err(Error::IndexFormat(format!(
                "records at {offset}+{length} outside of record section of {} bytes",
                self.record_len
            ))),
        }
    }
}

fn read_record(stream: &mut impl Read) -> Result<Option<Record>> {
    let file = stream.read_u32().map_err(codec::malformed)?;
    let offset = stream.read_u64().map_err(codec::malformed)?;

    Ok((file != MISSING_FILE).then_some(Record { file, offset }))
}

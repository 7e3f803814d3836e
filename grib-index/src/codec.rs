//! Binary index file format.
//!
//! Plain and partitioned indexes share one framing:
//!
//! ```text
//! [4 bytes]  magic number, different for plain and partitioned indexes
//! [4 bytes]  format version, big endian
//! [8 bytes]  length of the record section, big endian. 0 for partitioned indexes.
//! [varint]   length of the header message
//! [L bytes]  header message: groups, variables, coordinate pools, partitions
//! [rest]     record section (plain indexes only)
//! ```
//!
//! A file whose length doesn't add up exactly is rejected, so a partially written file never
//! reads as valid.
//!
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    collection::{
        CollectionIndex, Group, GroupParts, IndexKind, Origin, Partition, PartitionLocator,
        PartitionOverlay, RecordPointer, SourceFile, VariableData, VariableIndex,
    },
    coord::{EnsCoord, Pool, TimeCoord, TimeKind, TimeValue, VertCoord},
    errors::{Error, Result},
    extio::{varint_len, ExtendedRead, ExtendedWrite},
    identity::ParamIdentity,
    union::{SlotSource, TimeCoordUnion},
};

pub const PLAIN_MAGIC: [u8; 4] = *b"GBXI";
pub const PARTITIONED_MAGIC: [u8; 4] = *b"GBXP";

/// Size of the fixed part of the framing: magic number, version and record section length
pub(crate) const HEADER_SIZE: u64 = 4 + 4 + 8;

const TAG_PLAIN: u8 = 0;
const TAG_PARTITIONED: u8 = 1;

const TIME_POINT: u8 = 0;
const TIME_INTERVAL: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    Plain,
    Partitioned,
}

impl Variant {
    pub fn magic(self) -> [u8; 4] {
        match self {
            Variant::Plain => PLAIN_MAGIC,
            Variant::Partitioned => PARTITIONED_MAGIC,
        }
    }

    fn from_magic(magic: [u8; 4]) -> Option<Self> {
        match magic {
            PLAIN_MAGIC => Some(Variant::Plain),
            PARTITIONED_MAGIC => Some(Variant::Partitioned),
            _ => None,
        }
    }

    /// Version written by this implementation
    pub fn current_version(self) -> u32 {
        versions(self).map(|range| range.last).max().unwrap_or(0)
    }

    /// Oldest version this implementation can still read
    pub fn minimum_version(self) -> u32 {
        versions(self).map(|range| range.first).min().unwrap_or(0)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Plain => f.write_str("plain"),
            Variant::Partitioned => f.write_str("partitioned"),
        }
    }
}

/// How a header message is laid out.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Layout {
    /// No per-file modification stamps and no per-group file numbers
    Legacy,
    Current,
}

struct VersionRange {
    variant: Variant,
    first: u32,
    last: u32,
    layout: Layout,
}

/// Every readable version of each variant, and the layout its header uses
const VERSIONS: &[VersionRange] = &[
    VersionRange {
        variant: Variant::Plain,
        first: 1,
        last: 1,
        layout: Layout::Legacy,
    },
    VersionRange {
        variant: Variant::Plain,
        first: 2,
        last: 2,
        layout: Layout::Current,
    },
    VersionRange {
        variant: Variant::Partitioned,
        first: 1,
        last: 1,
        layout: Layout::Current,
    },
];

fn versions(variant: Variant) -> impl Iterator<Item = &'static VersionRange> {
    VERSIONS.iter().filter(move |range| range.variant == variant)
}

pub(crate) fn layout_for(variant: Variant, version: u32) -> Result<Layout> {
    let minimum = variant.minimum_version();
    if version < minimum {
        return Err(Error::IndexVersionTooOld {
            variant,
            found: version,
            minimum,
        });
    }

    versions(variant)
        .find(|range| range.first <= version && version <= range.last)
        .map(|range| range.layout)
        .ok_or_else(|| Error::IndexFormat(format!("unsupported {variant} index version {version}")))
}

/// Convert an I/O error encountered while decoding into the right kind of error.
///
/// Running out of bytes or finding garbage means the file is malformed. Anything else is a real
/// I/O problem.
///
pub(crate) fn malformed(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
            Error::IndexFormat(err.to_string())
        }
        _ => Error::Io(err),
    }
}

/// Write an index file in the current format.
///
/// On failure the partially written file is removed, as far as that is possible.
///
pub fn write_index(path: &Path, index: &CollectionIndex, records: &[u8]) -> Result<()> {
    write_index_as(path, index, records, index.variant().current_version())
}

pub(crate) fn write_index_as(
    path: &Path,
    index: &CollectionIndex,
    records: &[u8],
    version: u32,
) -> Result<()> {
    let variant = index.variant();
    let layout = layout_for(variant, version)?;
    let write_error = |source| Error::Write {
        path: PathBuf::from(path),
        source,
    };
    let header = encode_header(index, layout).map_err(write_error)?;

    let result = File::create(path).and_then(|file| {
        let mut stream = BufWriter::new(file);
        stream.write_all(&variant.magic())?;
        stream.write_u32(version)?;
        stream.write_u64(records.len() as u64)?;
        stream.write_bytes(&header)?;
        stream.write_all(records)?;

        stream.into_inner().map_err(|err| err.into_error())?.sync_all()
    });

    if let Err(err) = result {
        if let Err(cleanup) = fs::remove_file(path) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), "unable to remove partial index: {cleanup}");
            }
        }
        return Err(write_error(err));
    }

    debug!(
        path = %path.display(),
        %variant,
        version,
        header = header.len(),
        records = records.len(),
        "wrote index"
    );

    Ok(())
}

/// Read an index file, expecting the given variant.
///
pub fn read_index(path: &Path, variant: Variant) -> Result<CollectionIndex> {
    Ok(open(path, variant)?.index)
}

/// An index file opened for reading, positioned anywhere.
///
pub(crate) struct Opened {
    pub index: CollectionIndex,
    pub file: File,
    pub record_start: u64,
    pub record_len: u64,
}

pub(crate) fn open(path: &Path, variant: Variant) -> Result<Opened> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let (index, record_start, record_len) = {
        let mut stream = BufReader::new(&file);
        let frame = read_frame(&mut stream, variant, file_len)?;
        let index = decode_header(&frame.header, variant, frame.layout, frame.version)?;

        (index, frame.record_start, frame.record_len)
    };

    Ok(Opened {
        index,
        file,
        record_start,
        record_len,
    })
}

struct Frame {
    version: u32,
    layout: Layout,
    header: Vec<u8>,
    record_start: u64,
    record_len: u64,
}

fn read_frame(stream: &mut impl Read, variant: Variant, file_len: u64) -> Result<Frame> {
    let mut magic = [0; 4];
    stream.read_exact(&mut magic).map_err(malformed)?;
    if magic != variant.magic() {
        return Err(Error::IndexFormat(match Variant::from_magic(magic) {
            Some(found) => format!("expected {variant} index, found {found} index"),
            None => String::from("not an index file"),
        }));
    }

    let version = stream.read_u32().map_err(malformed)?;
    let layout = layout_for(variant, version)?;

    let record_len = stream.read_u64().map_err(malformed)?;
    if variant == Variant::Partitioned && record_len != 0 {
        return Err(Error::IndexFormat(String::from(
            "partitioned index has a record section",
        )));
    }

    let header_len = stream.read_varint().map_err(malformed)?;
    let record_start = (HEADER_SIZE + varint_len(header_len) as u64).checked_add(header_len);
    if record_start.and_then(|start| start.checked_add(record_len)) != Some(file_len) {
        return Err(Error::IndexFormat(String::from(
            "index file is truncated or has trailing data",
        )));
    }

    let mut header = vec![0; header_len as usize];
    stream.read_exact(&mut header).map_err(malformed)?;

    Ok(Frame {
        version,
        layout,
        header,
        record_start: record_start.unwrap_or_default(),
        record_len,
    })
}

pub(crate) fn encode_header(index: &CollectionIndex, layout: Layout) -> io::Result<Vec<u8>> {
    let mut stream = Vec::new();
    stream.write_str(&index.name)?;
    stream.write_str(&index.directory.to_string_lossy())?;
    write_origin(&mut stream, &index.origin)?;

    stream.write_varint(index.files.len() as u64)?;
    for file in &index.files {
        stream.write_str(&file.path)?;
        if layout == Layout::Current {
            stream.write_u64(file.modified)?;
        }
    }

    stream.write_varint(index.groups.len() as u64)?;
    for group in &index.groups {
        write_group(&mut stream, group, index.variant(), layout)?;
    }

    if let IndexKind::Partitioned { partitions, built } = &index.kind {
        stream.write_varint(partitions.len() as u64)?;
        for partition in partitions {
            stream.write_str(&partition.name)?;
            stream.write_str(&partition.directory.to_string_lossy())?;
            stream.write_str(&partition.index_filename)?;
            stream.write_u64(partition.last_modified)?;
        }
        stream.write_u64(*built)?;
    }

    Ok(stream)
}

fn decode_header(
    header: &[u8],
    variant: Variant,
    layout: Layout,
    version: u32,
) -> Result<CollectionIndex> {
    let mut stream = Cursor::new(header);
    let mut index = read_collection(&mut stream, variant, layout)?;
    if stream.position() != header.len() as u64 {
        return Err(Error::IndexFormat(String::from(
            "trailing bytes after header message",
        )));
    }
    index.version = version;

    Ok(index)
}

fn read_collection(
    stream: &mut impl Read,
    variant: Variant,
    layout: Layout,
) -> Result<CollectionIndex> {
    let name = stream.read_string().map_err(malformed)?;
    let directory = PathBuf::from(stream.read_string().map_err(malformed)?);
    let origin = read_origin(stream).map_err(malformed)?;

    let nfiles = read_count(stream)?;
    let mut files = Vec::new();
    for _ in 0..nfiles {
        let path = stream.read_string().map_err(malformed)?;
        let modified = match layout {
            Layout::Current => stream.read_u64().map_err(malformed)?,
            Layout::Legacy => 0,
        };
        files.push(SourceFile { path, modified });
    }

    let ngroups = read_count(stream)?;
    let mut groups = Vec::new();
    for _ in 0..ngroups {
        groups.push(read_group(stream, variant, layout, files.len())?);
    }

    let kind = match variant {
        Variant::Plain => IndexKind::Plain,
        Variant::Partitioned => {
            let npartitions = read_count(stream)?;
            let mut partitions = Vec::new();
            for _ in 0..npartitions {
                partitions.push(Partition {
                    name: stream.read_string().map_err(malformed)?,
                    directory: PathBuf::from(stream.read_string().map_err(malformed)?),
                    index_filename: stream.read_string().map_err(malformed)?,
                    last_modified: stream.read_u64().map_err(malformed)?,
                });
            }
            let built = stream.read_u64().map_err(malformed)?;

            IndexKind::Partitioned { partitions, built }
        }
    };

    CollectionIndex::new(name, directory, origin, files, groups, kind)
}

fn read_count(stream: &mut impl Read) -> Result<usize> {
    let count = stream.read_varint().map_err(malformed)?;
    usize::try_from(count).map_err(|_| Error::IndexFormat(format!("count {count} out of range")))
}

fn write_origin(stream: &mut impl Write, origin: &Origin) -> io::Result<()> {
    stream.write_u16(origin.center)?;
    stream.write_u16(origin.subcenter)?;
    stream.write_byte(origin.master_table)?;
    stream.write_byte(origin.local_table)?;
    stream.write_byte(origin.process_type)?;
    stream.write_byte(origin.process_id)?;
    stream.write_byte(origin.background_process)?;

    Ok(())
}

fn read_origin(stream: &mut impl Read) -> io::Result<Origin> {
    Ok(Origin {
        center: stream.read_u16()?,
        subcenter: stream.read_u16()?,
        master_table: stream.read_byte()?,
        local_table: stream.read_byte()?,
        process_type: stream.read_byte()?,
        process_id: stream.read_byte()?,
        background_process: stream.read_byte()?,
    })
}

fn write_group(
    stream: &mut impl Write,
    group: &Group,
    variant: Variant,
    layout: Layout,
) -> io::Result<()> {
    stream.write_u32(group.gds_hash())?;
    stream.write_bytes(group.gds())?;

    stream.write_varint(group.time_coords().len() as u64)?;
    for coord in group.time_coords() {
        write_time_coord(stream, coord)?;
    }

    stream.write_varint(group.vert_coords().len() as u64)?;
    for coord in group.vert_coords() {
        stream.write_u16(coord.level_type)?;
        stream.write_str(&coord.unit)?;
        stream.write_byte(coord.is_layer as u8)?;
        stream.write_varint(coord.len() as u64)?;
        for &(value, bound) in coord.levels() {
            stream.write_f64(value)?;
            stream.write_f64(bound)?;
        }
    }

    stream.write_varint(group.ens_coords().len() as u64)?;
    for coord in group.ens_coords() {
        stream.write_varint(coord.len() as u64)?;
        for &(member, derived) in coord.members() {
            stream.write_i32(member)?;
            stream.write_i32(derived)?;
        }
    }

    if variant == Variant::Partitioned {
        stream.write_varint(group.time_unions().len() as u64)?;
        for union in group.time_unions() {
            write_time_coord(stream, union.coord())?;
            for slot in 0..union.len() {
                let sources = union.sources(slot);
                stream.write_varint(sources.len() as u64)?;
                for source in sources {
                    stream.write_u32(source.partition)?;
                    stream.write_u32(source.index)?;
                }
            }
        }
    }

    if layout == Layout::Current {
        stream.write_varint(group.file_numbers().len() as u64)?;
        for &n in group.file_numbers() {
            stream.write_varint(n as u64)?;
        }
    }

    stream.write_varint(group.variables().len() as u64)?;
    for variable in group.variables() {
        write_variable(stream, variable)?;
    }

    Ok(())
}

fn read_group(
    stream: &mut impl Read,
    variant: Variant,
    layout: Layout,
    nfiles: usize,
) -> Result<Group> {
    let gds_hash = stream.read_u32().map_err(malformed)?;
    let gds = stream.read_bytes().map_err(malformed)?;

    let mut time_coords = vec![];
    for _ in 0..read_count(stream)? {
        time_coords.push(read_time_coord(stream)?);
    }

    let mut vert_coords = vec![];
    for _ in 0..read_count(stream)? {
        let level_type = stream.read_u16().map_err(malformed)?;
        let unit = stream.read_string().map_err(malformed)?;
        let is_layer = stream.read_byte().map_err(malformed)? != 0;
        let mut levels = vec![];
        for _ in 0..read_count(stream)? {
            let value = stream.read_f64().map_err(malformed)?;
            let bound = stream.read_f64().map_err(malformed)?;
            levels.push((value, bound));
        }
        vert_coords.push(VertCoord::new(level_type, unit, is_layer, levels));
    }

    let mut ens_coords = vec![];
    for _ in 0..read_count(stream)? {
        let mut members = vec![];
        for _ in 0..read_count(stream)? {
            let member = stream.read_i32().map_err(malformed)?;
            let derived = stream.read_i32().map_err(malformed)?;
            members.push((member, derived));
        }
        ens_coords.push(EnsCoord::new(members));
    }

    let mut time_unions = vec![];
    if variant == Variant::Partitioned {
        for _ in 0..read_count(stream)? {
            let coord = read_time_coord(stream)?;
            let mut sources = vec![];
            for _ in 0..coord.len() {
                let mut slot = vec![];
                for _ in 0..read_count(stream)? {
                    slot.push(SlotSource {
                        partition: stream.read_u32().map_err(malformed)?,
                        index: stream.read_u32().map_err(malformed)?,
                    });
                }
                sources.push(slot);
            }
            let union = TimeCoordUnion::from_parts(coord, sources)
                .ok_or_else(|| Error::IndexFormat(String::from("time union has an empty slot")))?;
            time_unions.push(union);
        }
    }

    let file_numbers = match layout {
        Layout::Current => {
            let mut file_numbers = vec![];
            for _ in 0..read_count(stream)? {
                let n = stream.read_varint().map_err(malformed)?;
                let n = u32::try_from(n)
                    .map_err(|_| Error::IndexFormat(format!("file number {n} out of range")))?;
                file_numbers.push(n);
            }
            file_numbers
        }
        Layout::Legacy => (0..nfiles as u32).collect(),
    };

    let mut variables = vec![];
    for _ in 0..read_count(stream)? {
        variables.push(read_variable(stream, variant)?);
    }

    Group::new(GroupParts {
        gds_hash,
        gds,
        time_coords: Pool::from(time_coords),
        vert_coords: Pool::from(vert_coords),
        ens_coords: Pool::from(ens_coords),
        time_unions: Pool::from(time_unions),
        file_numbers,
        variables,
    })
}

fn write_time_coord(stream: &mut impl Write, coord: &TimeCoord) -> io::Result<()> {
    stream.write_u16(coord.code)?;
    stream.write_str(&coord.unit)?;
    let values = coord.values();
    match coord.kind() {
        TimeKind::Point => stream.write_byte(TIME_POINT)?,
        TimeKind::Interval => stream.write_byte(TIME_INTERVAL)?,
    }
    stream.write_varint(values.len() as u64)?;
    for value in values {
        match value {
            TimeValue::Point(offset) => stream.write_i32(offset)?,
            TimeValue::Interval(start, end) => {
                stream.write_i32(start)?;
                stream.write_i32(end)?;
            }
        }
    }

    Ok(())
}

fn read_time_coord(stream: &mut impl Read) -> Result<TimeCoord> {
    let code = stream.read_u16().map_err(malformed)?;
    let unit = stream.read_string().map_err(malformed)?;
    let kind = stream.read_byte().map_err(malformed)?;
    let count = read_count(stream)?;

    let coord = match kind {
        TIME_POINT => {
            let mut offsets = vec![];
            for _ in 0..count {
                offsets.push(stream.read_i32().map_err(malformed)?);
            }
            TimeCoord::points(code, unit, offsets)
        }
        TIME_INTERVAL => {
            let mut intervals = vec![];
            for _ in 0..count {
                let start = stream.read_i32().map_err(malformed)?;
                let end = stream.read_i32().map_err(malformed)?;
                intervals.push((start, end));
            }
            TimeCoord::intervals(code, unit, intervals)
        }
        _ => return Err(Error::IndexFormat(format!("unknown time coordinate kind {kind}"))),
    };

    if coord.len() != count {
        return Err(Error::IndexFormat(String::from(
            "time coordinate values are not unique",
        )));
    }

    Ok(coord)
}

fn write_index_ref(stream: &mut impl Write, index: Option<usize>) -> io::Result<()> {
    stream.write_i32(index.map_or(-1, |i| i as i32))
}

fn read_index_ref(stream: &mut impl Read) -> Result<Option<usize>> {
    match stream.read_i32().map_err(malformed)? {
        -1 => Ok(None),
        i if i >= 0 => Ok(Some(i as usize)),
        i => Err(Error::IndexFormat(format!("invalid coordinate reference {i}"))),
    }
}

fn write_variable(stream: &mut impl Write, variable: &VariableIndex) -> io::Result<()> {
    variable.identity().write_to(stream)?;
    stream.write_u32(variable.cdm_hash())?;
    write_index_ref(stream, variable.time_idx())?;
    write_index_ref(stream, variable.vert_idx())?;
    write_index_ref(stream, variable.ens_idx())?;

    match variable.data() {
        VariableData::Plain(pointer) => {
            stream.write_byte(TAG_PLAIN)?;
            stream.write_u64(pointer.offset)?;
            stream.write_u64(pointer.length)?;
        }
        VariableData::Partitioned(overlay) => {
            stream.write_byte(TAG_PARTITIONED)?;
            write_index_ref(stream, overlay.union)?;
            stream.write_byte(overlay.coords_differ as u8)?;
            stream.write_varint(overlay.locators.len() as u64)?;
            for locator in &overlay.locators {
                match locator {
                    None => stream.write_byte(0)?,
                    Some(locator) => {
                        stream.write_byte(1)?;
                        stream.write_u32(locator.partition)?;
                        stream.write_u32(locator.group)?;
                        stream.write_u32(locator.variable)?;
                        stream.write_byte(locator.flags)?;
                    }
                }
            }
        }
    }

    Ok(())
}

fn read_variable(stream: &mut impl Read, variant: Variant) -> Result<VariableIndex> {
    let identity = ParamIdentity::read_from(stream).map_err(malformed)?;
    let cdm_hash = stream.read_u32().map_err(malformed)?;
    let time_idx = read_index_ref(stream)?;
    let vert_idx = read_index_ref(stream)?;
    let ens_idx = read_index_ref(stream)?;

    let tag = stream.read_byte().map_err(malformed)?;
    let data = match (tag, variant) {
        (TAG_PLAIN, Variant::Plain) => VariableData::Plain(RecordPointer {
            offset: stream.read_u64().map_err(malformed)?,
            length: stream.read_u64().map_err(malformed)?,
        }),
        (TAG_PARTITIONED, Variant::Partitioned) => {
            let union = read_index_ref(stream)?;
            let coords_differ = stream.read_byte().map_err(malformed)? != 0;
            let mut locators = vec![];
            for _ in 0..read_count(stream)? {
                let locator = match stream.read_byte().map_err(malformed)? {
                    0 => None,
                    _ => Some(PartitionLocator {
                        partition: stream.read_u32().map_err(malformed)?,
                        group: stream.read_u32().map_err(malformed)?,
                        variable: stream.read_u32().map_err(malformed)?,
                        flags: stream.read_byte().map_err(malformed)?,
                    }),
                };
                locators.push(locator);
            }
            VariableData::Partitioned(PartitionOverlay {
                union,
                coords_differ,
                locators,
            })
        }
        _ => {
            return Err(Error::IndexFormat(format!(
                "unexpected variable tag {tag} in {variant} index"
            )))
        }
    };

    let variable = VariableIndex::new(identity, time_idx, vert_idx, ens_idx, data);
    if variable.cdm_hash() != cdm_hash {
        return Err(Error::IndexFormat(format!(
            "identity hash mismatch for {}",
            variable.name()
        )));
    }

    Ok(variable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn patch(path: &Path, at: usize, bytes: &[u8]) -> io::Result<()> {
        let mut data = fs::read(path)?;
        data[at..at + bytes.len()].copy_from_slice(bytes);
        fs::write(path, data)
    }

    #[test]
    fn test_version_table() {
        assert_eq!(Variant::Plain.current_version(), 2);
        assert_eq!(Variant::Plain.minimum_version(), 1);
        assert_eq!(Variant::Partitioned.current_version(), 1);
        assert_eq!(Variant::Partitioned.minimum_version(), 1);
        assert_eq!(layout_for(Variant::Plain, 1).unwrap(), Layout::Legacy);
        assert_eq!(layout_for(Variant::Plain, 2).unwrap(), Layout::Current);
        assert_ne!(PLAIN_MAGIC, PARTITIONED_MAGIC);
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("day1.gbx");
        let build = testing::sample_build()?;
        write_index(&path, &build.index, &build.records)?;

        let index = read_index(&path, Variant::Plain)?;
        assert_eq!(index, build.index);
        assert_eq!(index.version(), 2);

        Ok(())
    }

    #[test]
    fn test_version_too_old() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("old.gbx");
        let build = testing::sample_build()?;
        write_index(&path, &build.index, &build.records)?;
        patch(&path, 4, &0_u32.to_be_bytes())?;

        match read_index(&path, Variant::Plain) {
            Err(Error::IndexVersionTooOld {
                variant,
                found,
                minimum,
            }) => {
                assert_eq!(variant, Variant::Plain);
                assert_eq!(found, 0);
                assert_eq!(minimum, 1);
            }
            other => panic!("expected IndexVersionTooOld, got {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn test_version_too_new() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("new.gbx");
        let build = testing::sample_build()?;
        write_index(&path, &build.index, &build.records)?;
        patch(&path, 4, &99_u32.to_be_bytes())?;

        assert!(matches!(
            read_index(&path, Variant::Plain),
            Err(Error::IndexFormat(_))
        ));

        Ok(())
    }

    #[test]
    fn test_legacy_layout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("legacy.gbx");
        let build = testing::sample_build()?;
        write_index_as(&path, &build.index, &build.records, 1)?;

        let index = read_index(&path, Variant::Plain)?;
        assert_eq!(index.version(), 1);
        assert_eq!(index.groups().len(), build.index.groups().len());
        assert!(index.files().iter().all(|file| file.modified == 0));
        for group in index.groups() {
            let all: Vec<u32> = (0..index.files().len() as u32).collect();
            assert_eq!(group.file_numbers(), all.as_slice());
        }

        Ok(())
    }

    #[test]
    fn test_wrong_variant() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("day1.gbx");
        let build = testing::sample_build()?;
        write_index(&path, &build.index, &build.records)?;

        match read_index(&path, Variant::Partitioned) {
            Err(Error::IndexFormat(message)) => {
                assert_eq!(message, "expected partitioned index, found plain index")
            }
            other => panic!("expected IndexFormat, got {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn test_not_an_index() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("garbage");
        fs::write(&path, b"GRIB\x00\x00\x00\x02")?;

        assert!(matches!(
            read_index(&path, Variant::Plain),
            Err(Error::IndexFormat(_))
        ));

        Ok(())
    }

    #[test]
    fn test_truncated() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("partial.gbx");
        let build = testing::sample_build()?;
        write_index(&path, &build.index, &build.records)?;

        let data = fs::read(&path)?;
        for len in [0, 3, 10, HEADER_SIZE as usize + 1, data.len() - 1] {
            fs::write(&path, &data[..len])?;
            let result = read_index(&path, Variant::Plain);
            assert!(
                matches!(result, Err(Error::IndexFormat(_))),
                "length {len}: {result:?}"
            );
        }

        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let err = read_index(Path::new("/nonexistent/index.gbx"), Variant::Plain).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.should_rebuild());
    }

    #[test]
    fn test_write_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("no").join("such").join("dir.gbx");
        let build = testing::sample_build()?;

        let err = write_index(&path, &build.index, &build.records).unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert!(!path.exists());

        Ok(())
    }
}

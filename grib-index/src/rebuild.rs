//! Deciding whether a partitioned index on disk can be reused, and rebuilding it when it can't.
//!
//! Rebuilds are all or nothing. There is no incremental merge of changed partitions.
//!
use std::fmt;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::{
    codec::{self, Variant},
    collection::CollectionIndex,
    diagnostics::Diagnostics,
    errors::{Error, Result},
    helpers::{file_stamp, Stamp},
    partition::{PartitionedConfig, TimePartitionBuilder},
    source::{FileInventory, Sources},
};

/// Why a partitioned index was, or wasn't, rebuilt.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebuildDecision {
    /// The caller asked for a rebuild
    Forced,

    /// There is no index file
    Missing,

    /// The index file can't be read, eg it's corrupt or its format version is too old
    Unreadable(String),

    /// The configured partitions are not the ones the index was built from
    PartitionsChanged,

    /// A partition's source files or index changed after the index was built
    Stale { partition: String },

    UpToDate,
}

impl RebuildDecision {
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, RebuildDecision::UpToDate)
    }
}

impl fmt::Display for RebuildDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildDecision::Forced => write!(f, "rebuild forced"),
            RebuildDecision::Missing => write!(f, "index missing"),
            RebuildDecision::Unreadable(reason) => write!(f, "index unreadable: {reason}"),
            RebuildDecision::PartitionsChanged => write!(f, "partitions changed"),
            RebuildDecision::Stale { partition } => write!(f, "partition {partition} changed"),
            RebuildDecision::UpToDate => write!(f, "up to date"),
        }
    }
}

/// Decide whether the partitioned index at `config.index_path` needs rebuilding.
///
/// When it doesn't, the index that was read to decide is returned with the decision.
///
pub fn check(
    config: &PartitionedConfig,
    inventory: &dyn FileInventory,
    force: bool,
) -> Result<(RebuildDecision, Option<CollectionIndex>)> {
    if force {
        return Ok((RebuildDecision::Forced, None));
    }

    let index = match codec::read_index(&config.index_path, Variant::Partitioned) {
        Ok(index) => index,
        Err(Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            return Ok((RebuildDecision::Missing, None));
        }
        Err(err) if err.should_rebuild() => {
            return Ok((RebuildDecision::Unreadable(err.to_string()), None));
        }
        Err(err) => return Err(err),
    };
    let built = index.built().unwrap_or_default();

    // Every partition in the index must still be configured, and every configured partition
    // left out of the index must still be unavailable.
    for partition in index.partitions() {
        if !config.partitions.iter().any(|p| p.name == partition.name) {
            return Ok((RebuildDecision::PartitionsChanged, None));
        }
    }
    for partition in &config.partitions {
        let known = index.partitions().iter().any(|p| p.name == partition.name);
        if !known && file_stamp(&partition.index_path())?.is_some() {
            return Ok((RebuildDecision::PartitionsChanged, None));
        }
    }

    for partition in index.partitions() {
        let stale = RebuildDecision::Stale {
            partition: partition.name.clone(),
        };
        match file_stamp(&partition.index_path())? {
            Some(stamp) if stamp <= partition.last_modified => {}
            _ => return Ok((stale, None)),
        }

        match newest_source(inventory, &partition.directory) {
            Ok(Some(stamp)) if stamp > built => return Ok((stale, None)),
            Ok(_) => {}
            Err(err) => {
                debug!(partition = %partition.name, "unable to list source files: {err}");
                return Ok((stale, None));
            }
        }
    }

    if config.rebuild_children {
        if let Some(decision) = children_changed(config, &index, inventory)? {
            return Ok((decision, None));
        }
    }

    Ok((RebuildDecision::UpToDate, Some(index)))
}

/// Compare every configured partition's source files with the ones its child index was built
/// from. A partition left out of the last build counts as changed once it has any source files.
///
fn children_changed(
    config: &PartitionedConfig,
    index: &CollectionIndex,
    inventory: &dyn FileInventory,
) -> Result<Option<RebuildDecision>> {
    for partition in &config.partitions {
        let stale = RebuildDecision::Stale {
            partition: partition.name.clone(),
        };

        if index.partitions().iter().all(|p| p.name != partition.name) {
            match inventory.files(&partition.directory) {
                Ok(files) if !files.is_empty() => {
                    return Ok(Some(RebuildDecision::PartitionsChanged))
                }
                _ => continue,
            }
        }

        let child = match codec::read_index(&partition.index_path(), Variant::Plain) {
            Ok(child) => child,
            Err(err) if err.should_rebuild() => return Ok(Some(stale)),
            Err(err) => return Err(err),
        };
        match sources_changed(&child, inventory, &partition.directory) {
            Ok(false) => {}
            Ok(true) => return Ok(Some(stale)),
            Err(err) => {
                debug!(partition = %partition.name, "unable to list source files: {err}");
                return Ok(Some(stale));
            }
        }
    }

    Ok(None)
}

fn newest_source(inventory: &dyn FileInventory, directory: &Path) -> Result<Option<Stamp>> {
    Ok(inventory
        .files(directory)?
        .iter()
        .map(|file| file.modified)
        .max())
}

/// Whether a plain index's source files have changed: files added, removed, renamed or modified
/// since the index was built.
///
pub(crate) fn sources_changed(
    index: &CollectionIndex,
    inventory: &dyn FileInventory,
    directory: &Path,
) -> Result<bool> {
    let files = inventory.files(directory)?;
    if files.len() != index.files().len() {
        return Ok(true);
    }

    Ok(files
        .iter()
        .zip(index.files())
        .any(|(now, then)| now.path != then.path || now.modified > then.modified))
}

/// Open a partitioned collection, rebuilding its index first if it is missing, unreadable or
/// out of date.
///
/// On a failed rebuild no index is left at `config.index_path`.
///
pub fn open_partitioned(
    config: &PartitionedConfig,
    sources: Sources,
    force: bool,
    diagnostics: &mut Diagnostics,
) -> Result<(CollectionIndex, RebuildDecision)> {
    let (decision, index) = check(config, sources.inventory, force)?;
    if let Some(index) = index {
        debug!(collection = %config.name, "partitioned index is up to date");
        return Ok((index, decision));
    }

    info!(collection = %config.name, reason = %decision, "rebuilding partitioned index");
    let index = TimePartitionBuilder::new(config)
        .with_sources(sources)
        .build_and_write(diagnostics)?;

    Ok((index, decision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::helpers::now;
    use crate::partition::PartitionConfig;
    use crate::source::StandardTables;
    use crate::testing::{
        fields, record, tmp, write_partition, MemoryInventory, ScriptedDecoder,
    };

    fn setup(root: &Path) -> Result<PartitionedConfig> {
        Ok(PartitionedConfig {
            name: String::from("gfs"),
            directory: root.to_path_buf(),
            index_path: root.join("gfs.gbxp"),
            partitions: vec![
                write_partition(root, "day1", &[0, 6], &fields())?,
                write_partition(root, "day2", &[12, 18], &fields())?,
            ],
            rebuild_children: false,
        })
    }

    fn open(
        config: &PartitionedConfig,
        inventory: &MemoryInventory,
        force: bool,
    ) -> Result<(CollectionIndex, RebuildDecision)> {
        open_with(config, inventory, &ScriptedDecoder::new(), force)
    }

    fn open_with(
        config: &PartitionedConfig,
        inventory: &MemoryInventory,
        decoder: &ScriptedDecoder,
        force: bool,
    ) -> Result<(CollectionIndex, RebuildDecision)> {
        let sources = Sources {
            inventory,
            decoder,
            tables: &StandardTables,
        };

        open_partitioned(config, sources, force, &mut Diagnostics::new())
    }

    /// Two partitions whose indexes are built from source: a from a1.grb2 and a2.grb2 (hours 0
    /// and 6), b from b.grb2 (hour 12).
    ///
    fn setup_from_source(root: &Path) -> Result<(PartitionedConfig, ScriptedDecoder)> {
        let a = PartitionConfig::new("a", root.join("a"), "a.gbx");
        let b = PartitionConfig::new("b", root.join("b"), "b.gbx");
        fs::create_dir_all(&a.directory)?;
        fs::create_dir_all(&b.directory)?;

        let decoder = ScriptedDecoder::new()
            .with_file("a1.grb2", vec![record(1, tmp(), 0, Some(85000.0), 0)])
            .with_file("a2.grb2", vec![record(1, tmp(), 6, Some(85000.0), 0)])
            .with_file("b.grb2", vec![record(1, tmp(), 12, Some(85000.0), 0)]);
        let config = PartitionedConfig {
            name: String::from("gfs"),
            directory: root.to_path_buf(),
            index_path: root.join("gfs.gbxp"),
            partitions: vec![a, b],
            rebuild_children: true,
        };

        Ok((config, decoder))
    }

    fn ntimes(index: &CollectionIndex) -> usize {
        index.groups()[0].variables()[0].ntimes()
    }

    #[test]
    fn test_build_then_reuse() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path())?;
        let inventory = MemoryInventory::new(&[("source.grb2", 1000)]);

        let (built, decision) = open(&config, &inventory, false)?;
        assert_eq!(decision, RebuildDecision::Missing);
        assert!(decision.needs_rebuild());
        assert!(config.index_path.exists());

        let (reused, decision) = open(&config, &inventory, false)?;
        assert_eq!(decision, RebuildDecision::UpToDate);
        assert!(!decision.needs_rebuild());
        assert_eq!(reused, built);

        let (_, decision) = open(&config, &inventory, true)?;
        assert_eq!(decision, RebuildDecision::Forced);

        Ok(())
    }

    #[test]
    fn test_unreadable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path())?;
        let inventory = MemoryInventory::new(&[("source.grb2", 1000)]);
        fs::write(&config.index_path, b"GBXP garbage")?;

        let (decision, index) = check(&config, &inventory, false)?;
        assert!(matches!(decision, RebuildDecision::Unreadable(_)));
        assert!(index.is_none());

        let (index, _) = open(&config, &inventory, false)?;
        assert_eq!(index.partitions().len(), 2);

        Ok(())
    }

    #[test]
    fn test_version_too_old() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path())?;
        let inventory = MemoryInventory::new(&[("source.grb2", 1000)]);
        open(&config, &inventory, false)?;

        let mut data = fs::read(&config.index_path)?;
        data[4..8].copy_from_slice(&0_u32.to_be_bytes());
        fs::write(&config.index_path, data)?;

        let (decision, _) = check(&config, &inventory, false)?;
        match decision {
            RebuildDecision::Unreadable(reason) => assert!(reason.contains("older than")),
            other => panic!("expected Unreadable, got {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn test_stale_source() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path())?;
        open(&config, &MemoryInventory::new(&[("source.grb2", 1000)]), false)?;

        let touched = MemoryInventory::new(&[("source.grb2", 1000)])
            .with_directory(&config.partitions[1].directory, &[("day2.grb2", now() + 60_000)]);
        let (decision, _) = check(&config, &touched, false)?;
        assert_eq!(
            decision,
            RebuildDecision::Stale {
                partition: String::from("day2")
            }
        );

        Ok(())
    }

    #[test]
    fn test_inventory_failure_is_stale() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path())?;
        open(&config, &MemoryInventory::new(&[("source.grb2", 1000)]), false)?;

        let (decision, _) = check(&config, &MemoryInventory::unavailable(), false)?;
        assert_eq!(
            decision,
            RebuildDecision::Stale {
                partition: String::from("day1")
            }
        );

        Ok(())
    }

    #[test]
    fn test_partitions_changed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        let mut config = setup(root)?;
        let inventory = MemoryInventory::new(&[("source.grb2", 1000)]);
        open(&config, &inventory, false)?;

        // A partition that never had an index doesn't count
        config
            .partitions
            .push(PartitionConfig::new("day3", root.join("day3"), "day3.gbx"));
        let (decision, _) = check(&config, &inventory, false)?;
        assert_eq!(decision, RebuildDecision::UpToDate);

        // Until it does
        config.partitions[2] = write_partition(root, "day3", &[24, 30], &fields())?;
        let (decision, _) = check(&config, &inventory, false)?;
        assert_eq!(decision, RebuildDecision::PartitionsChanged);

        // Dropping a partition the index was built from
        config.partitions.remove(0);
        config.partitions.pop();
        let (decision, _) = check(&config, &inventory, false)?;
        assert_eq!(decision, RebuildDecision::PartitionsChanged);

        Ok(())
    }

    #[test]
    fn test_failed_rebuild_removes_index() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        let config = setup(root)?;
        let inventory = MemoryInventory::new(&[("source.grb2", 1000)]);
        open(&config, &inventory, false)?;

        for partition in &config.partitions {
            fs::remove_file(partition.index_path())?;
        }

        let result = open(&config, &inventory, true);
        assert!(matches!(result, Err(Error::NoPartitionsSucceeded(_))));
        assert!(!config.index_path.exists());

        Ok(())
    }

    #[test]
    fn test_sources_added_to_left_out_partition() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (config, decoder) = setup_from_source(dir.path())?;
        let a = &config.partitions[0].directory;
        let b = &config.partitions[1].directory;

        // b has nothing yet, so it is left out
        let inventory = MemoryInventory::unavailable()
            .with_directory(a, &[("a1.grb2", 1000), ("a2.grb2", 1000)])
            .with_directory(b, &[]);
        let (index, decision) = open_with(&config, &inventory, &decoder, false)?;
        assert_eq!(decision, RebuildDecision::Missing);
        assert_eq!(index.partitions().len(), 1);

        let (decision, _) = check(&config, &inventory, false)?;
        assert_eq!(decision, RebuildDecision::UpToDate);

        let later = MemoryInventory::unavailable()
            .with_directory(a, &[("a1.grb2", 1000), ("a2.grb2", 1000)])
            .with_directory(b, &[("b.grb2", now() + 60_000)]);
        let (decision, _) = check(&config, &later, false)?;
        assert_eq!(decision, RebuildDecision::PartitionsChanged);

        let (index, _) = open_with(&config, &later, &decoder, false)?;
        assert_eq!(index.partitions().len(), 2);
        assert_eq!(ntimes(&index), 3);

        Ok(())
    }

    #[test]
    fn test_source_removed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (config, decoder) = setup_from_source(dir.path())?;
        let a = &config.partitions[0].directory;
        let b = &config.partitions[1].directory;

        let inventory = MemoryInventory::unavailable()
            .with_directory(a, &[("a1.grb2", 1000), ("a2.grb2", 1000)])
            .with_directory(b, &[("b.grb2", 1000)]);
        let (index, _) = open_with(&config, &inventory, &decoder, false)?;
        assert_eq!(ntimes(&index), 3);

        let (decision, _) = check(&config, &inventory, false)?;
        assert_eq!(decision, RebuildDecision::UpToDate);

        // a2.grb2 is gone, which doesn't move the newest source stamp
        let fewer = MemoryInventory::unavailable()
            .with_directory(a, &[("a1.grb2", 1000)])
            .with_directory(b, &[("b.grb2", 1000)]);
        let stale = RebuildDecision::Stale {
            partition: String::from("a"),
        };
        let (decision, _) = check(&config, &fewer, false)?;
        assert_eq!(decision, stale);

        let (index, decision) = open_with(&config, &fewer, &decoder, false)?;
        assert_eq!(decision, stale);
        assert_eq!(ntimes(&index), 2);

        let (decision, _) = check(&config, &fewer, false)?;
        assert_eq!(decision, RebuildDecision::UpToDate);

        Ok(())
    }
}

//! Merging time axes across partitions.
//!
use std::collections::BTreeMap;

use crate::coord::{TimeCoord, TimeValue};

/// Where a merged time slot came from: a partition number and the index on that partition's own
/// time axis.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlotSource {
    pub partition: u32,
    pub index: u32,
}

/// The ascending union of one variable's time axes across partitions.
///
/// Every slot of the merged axis lists the partitions that supplied it. When more than one
/// partition reports the same time value the slots collapse into one, with all contributors
/// listed in partition order.
///
#[derive(Clone, Debug, PartialEq)]
pub struct TimeCoordUnion {
    coord: TimeCoord,
    sources: Vec<Vec<SlotSource>>,
}

impl TimeCoordUnion {
    /// Assemble a union from decoded parts.
    ///
    /// Returns `None` unless there is exactly one non-empty source list per slot.
    ///
    pub(crate) fn from_parts(coord: TimeCoord, sources: Vec<Vec<SlotSource>>) -> Option<Self> {
        if coord.len() != sources.len() || sources.iter().any(|slot| slot.is_empty()) {
            return None;
        }

        Some(Self { coord, sources })
    }

    /// The merged time axis
    pub fn coord(&self) -> &TimeCoord {
        &self.coord
    }

    pub fn len(&self) -> usize {
        self.coord.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coord.is_empty()
    }

    /// All partitions contributing to a slot
    pub fn sources(&self, slot: usize) -> &[SlotSource] {
        self.sources.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The source a reader should use for a slot.
    ///
    /// Where several partitions supply the same time the highest numbered, ie most recently
    /// listed, partition wins.
    ///
    pub fn resolve(&self, slot: usize) -> Option<SlotSource> {
        self.sources.get(slot)?.last().copied()
    }
}

/// Merge per-partition time axes for one variable.
///
/// Only axes of the same kind (point or interval) and unit code as `canonical` take part. The
/// partition numbers of any excluded axes are returned alongside the union so the caller can
/// report them.
///
pub fn union_time_coords(
    canonical: &TimeCoord,
    partitions: &[(u32, &TimeCoord)],
) -> (TimeCoordUnion, Vec<u32>) {
    let mut slots: BTreeMap<TimeValue, Vec<SlotSource>> = BTreeMap::new();
    let mut excluded = vec![];

    for &(partition, coord) in partitions {
        if coord.kind() != canonical.kind() || coord.code != canonical.code {
            excluded.push(partition);
            continue;
        }

        for (index, value) in coord.values().into_iter().enumerate() {
            slots.entry(value).or_default().push(SlotSource {
                partition,
                index: index as u32,
            });
        }
    }

    let values: Vec<TimeValue> = slots.keys().copied().collect();
    let coord = TimeCoord::from_values(canonical.code, canonical.unit.clone(), &values)
        .unwrap_or_else(|| TimeCoord::points(canonical.code, canonical.unit.clone(), vec![]));
    let sources = slots
        .into_values()
        .map(|mut slot| {
            slot.sort_unstable();
            slot
        })
        .collect();

    (TimeCoordUnion { coord, sources }, excluded)
}

//! Coordinate axes shared by the variables of a group, and the pools that deduplicate them.
//!
use std::cmp::Ordering;
use std::fmt;

use ndarray::Array1;

use crate::helpers::rearrange;

/// Names a coordinate axis, for error reporting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Time,
    Vertical,
    Ensemble,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::Time => "time",
            Axis::Vertical => "vertical",
            Axis::Ensemble => "ensemble",
        };
        f.write_str(name)
    }
}

/// A single value on a time axis.
///
/// Offsets are in the axis' unit, relative to the collection's reference time. Interval values
/// order by start, then end.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeValue {
    Point(i32),
    Interval(i32, i32),
}

impl TimeValue {
    pub fn kind(&self) -> TimeKind {
        match self {
            TimeValue::Point(_) => TimeKind::Point,
            TimeValue::Interval(_, _) => TimeKind::Interval,
        }
    }

    /// The offset, or the start of the interval
    pub fn start(&self) -> i32 {
        match *self {
            TimeValue::Point(offset) => offset,
            TimeValue::Interval(start, _) => start,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeKind {
    Point,
    Interval,
}

#[derive(Clone, Debug, PartialEq)]
enum TimeValues {
    Point(Vec<i32>),
    Interval(Vec<(i32, i32)>),
}

/// A time axis: either all points or all intervals, never a mix.
///
/// Values are kept sorted ascending with duplicates removed.
///
#[derive(Clone, Debug, PartialEq)]
pub struct TimeCoord {
    /// Time unit code, used to group axes that are comparable
    pub code: u16,

    /// Human readable unit, eg "hours"
    pub unit: String,

    values: TimeValues,
}

impl TimeCoord {
    pub fn points<S: Into<String>>(code: u16, unit: S, mut offsets: Vec<i32>) -> Self {
        offsets.sort_unstable();
        offsets.dedup();

        Self {
            code,
            unit: unit.into(),
            values: TimeValues::Point(offsets),
        }
    }

    pub fn intervals<S: Into<String>>(code: u16, unit: S, intervals: Vec<(i32, i32)>) -> Self {
        let mut intervals: Vec<(i32, i32)> = intervals
            .into_iter()
            .map(|(start, end)| rearrange(start, end))
            .collect();
        intervals.sort_unstable();
        intervals.dedup();

        Self {
            code,
            unit: unit.into(),
            values: TimeValues::Interval(intervals),
        }
    }

    /// Build a coordinate from values that are all of one kind.
    ///
    /// Returns `None` if `values` is empty or mixes points with intervals.
    ///
    pub fn from_values<S: Into<String>>(code: u16, unit: S, values: &[TimeValue]) -> Option<Self> {
        match values.first()?.kind() {
            TimeKind::Point => {
                let offsets = values
                    .iter()
                    .map(|value| match *value {
                        TimeValue::Point(offset) => Some(offset),
                        TimeValue::Interval(_, _) => None,
                    })
                    .collect::<Option<Vec<i32>>>()?;
                Some(Self::points(code, unit, offsets))
            }
            TimeKind::Interval => {
                let intervals = values
                    .iter()
                    .map(|value| match *value {
                        TimeValue::Interval(start, end) => Some((start, end)),
                        TimeValue::Point(_) => None,
                    })
                    .collect::<Option<Vec<(i32, i32)>>>()?;
                Some(Self::intervals(code, unit, intervals))
            }
        }
    }

    pub fn kind(&self) -> TimeKind {
        match self.values {
            TimeValues::Point(_) => TimeKind::Point,
            TimeValues::Interval(_) => TimeKind::Interval,
        }
    }

    pub fn len(&self) -> usize {
        match &self.values {
            TimeValues::Point(offsets) => offsets.len(),
            TimeValues::Interval(intervals) => intervals.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<TimeValue> {
        match &self.values {
            TimeValues::Point(offsets) => offsets.get(index).map(|&o| TimeValue::Point(o)),
            TimeValues::Interval(intervals) => intervals
                .get(index)
                .map(|&(start, end)| TimeValue::Interval(start, end)),
        }
    }

    pub fn values(&self) -> Vec<TimeValue> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// Position of `value` on this axis
    pub fn position(&self, value: TimeValue) -> Option<usize> {
        match (&self.values, value) {
            (TimeValues::Point(offsets), TimeValue::Point(offset)) => {
                offsets.binary_search(&offset).ok()
            }
            (TimeValues::Interval(intervals), TimeValue::Interval(start, end)) => {
                intervals.binary_search(&rearrange(start, end)).ok()
            }
            _ => None,
        }
    }

    /// The axis as an array of offsets. Interval axes report interval starts.
    ///
    pub fn offsets(&self) -> Array1<i64> {
        match &self.values {
            TimeValues::Point(offsets) => Array1::from_iter(offsets.iter().map(|&o| o as i64)),
            TimeValues::Interval(intervals) => {
                Array1::from_iter(intervals.iter().map(|&(start, _)| start as i64))
            }
        }
    }
}

/// A vertical axis of (value, bound) pairs. For non-layer levels the bound repeats the value.
///
#[derive(Clone, Debug, PartialEq)]
pub struct VertCoord {
    pub level_type: u16,
    pub unit: String,
    pub is_layer: bool,
    levels: Vec<(f64, f64)>,
}

impl VertCoord {
    pub fn new<S: Into<String>>(
        level_type: u16,
        unit: S,
        is_layer: bool,
        mut levels: Vec<(f64, f64)>,
    ) -> Self {
        levels.sort_by(compare_levels);
        levels.dedup();

        Self {
            level_type,
            unit: unit.into(),
            is_layer,
            levels,
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[(f64, f64)] {
        &self.levels
    }

    pub fn position(&self, level: (f64, f64)) -> Option<usize> {
        self.levels
            .binary_search_by(|probe| compare_levels(probe, &level))
            .ok()
    }

    /// The first value of each level, as an array
    pub fn values(&self) -> Array1<f64> {
        Array1::from_iter(self.levels.iter().map(|&(value, _)| value))
    }
}

fn compare_levels(a: &(f64, f64), b: &(f64, f64)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1))
}

/// An ensemble axis of (member, derived type) pairs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnsCoord {
    members: Vec<(i32, i32)>,
}

impl EnsCoord {
    pub fn new(mut members: Vec<(i32, i32)>) -> Self {
        members.sort_unstable();
        members.dedup();

        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[(i32, i32)] {
        &self.members
    }

    pub fn position(&self, member: (i32, i32)) -> Option<usize> {
        self.members.binary_search(&member).ok()
    }
}

/// Deduplicating storage for coordinate axes, referenced by index.
///
/// Pools are small relative to the number of records they describe, so interning is a linear
/// scan for a value-equal entry.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Pool<T> {
    items: Vec<T>,
}

impl<T: PartialEq> Pool<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Return the index of an existing entry equal to `value`, or append it and return the new
    /// index.
    ///
    pub fn intern(&mut self, value: T) -> usize {
        match self.items.iter().position(|item| *item == value) {
            Some(index) => index,
            None => {
                self.items.push(value);
                self.items.len() - 1
            }
        }
    }
}

impl<T> Pool<T> {
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T: PartialEq> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps already decoded entries without deduplicating them
impl<T> From<Vec<T>> for Pool<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

impl<'a, T> IntoIterator for &'a Pool<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

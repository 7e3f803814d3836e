mod build;
mod cache;
mod codec;
mod collection;
mod coord;
mod diagnostics;
mod errors;
mod extio;
mod helpers;
mod identity;
mod partition;
mod rebuild;
mod session;
mod source;
mod union;

#[cfg(test)]
mod testing;

pub use build::build_collection;
pub use build::Build;
pub use build::CollectionBuilder;
pub use build::CollectionConfig;

pub use cache::Cache;
pub use cache::Cacheable;
pub use cache::IndexCache;

pub use codec::read_index;
pub use codec::write_index;
pub use codec::Variant;
pub use codec::{PARTITIONED_MAGIC, PLAIN_MAGIC};

pub use collection::ChildRecord;
pub use collection::CollectionIndex;
pub use collection::Group;
pub use collection::IndexKind;
pub use collection::Origin;
pub use collection::Partition;
pub use collection::PartitionLocator;
pub use collection::PartitionOverlay;
pub use collection::RecordPointer;
pub use collection::SourceFile;
pub use collection::VariableData;
pub use collection::VariableIndex;

pub use coord::Axis;
pub use coord::EnsCoord;
pub use coord::Pool;
pub use coord::TimeCoord;
pub use coord::TimeKind;
pub use coord::TimeValue;
pub use coord::VertCoord;

pub use diagnostics::Diagnostic;
pub use diagnostics::Diagnostics;
pub use diagnostics::Severity;

pub use errors::Error;
pub use errors::Result;

pub use helpers::{file_stamp, now, Stamp};

pub use identity::ParamIdentity;

pub use partition::PartitionConfig;
pub use partition::PartitionedConfig;
pub use partition::TimePartitionBuilder;

pub use rebuild::check;
pub use rebuild::open_partitioned;
pub use rebuild::RebuildDecision;

pub use session::Record;
pub use session::RecordSession;
pub use session::RECORD_SIZE;

pub use source::CustomizerSource;
pub use source::DecodedFile;
pub use source::DecodedRecord;
pub use source::DirectoryInventory;
pub use source::FileInventory;
pub use source::RecordDecoder;
pub use source::Sources;
pub use source::StandardTables;
pub use source::TableCustomizer;

pub use union::union_time_coords;
pub use union::SlotSource;
pub use union::TimeCoordUnion;

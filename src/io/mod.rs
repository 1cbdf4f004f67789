//! Sequence file splitting and manifest publication.

mod manifest;
mod splitter;

pub use manifest::{build_manifest, Manifest};
pub use splitter::{parse_records, writer_count, SequenceRecord, SequenceSplitter, SplitOptions, SplitSummary};

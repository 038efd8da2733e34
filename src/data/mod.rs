pub mod history;
pub mod ingestion;
pub mod snapshot;

pub use history::{closest_row_at_or_before, History, PackedHistory, PackedRow, Row, SharedHistory};
pub use ingestion::{IngestionService, MergeStats, SyncReport};
pub use snapshot::{Encoding, SnapshotCache};

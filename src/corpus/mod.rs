//! Read-only corpus data the engines analyze

mod snapshot;
pub mod text;
mod view;

pub use snapshot::{CorpusSnapshot, SnapshotId};
pub use view::{CorpusExport, CorpusView, Document, DocumentId, Passage, PassageId, UserId};

//! Discovery records and their building blocks

mod evidence;
mod fingerprint;
mod summary;
mod types;

pub use evidence::EvidenceRef;
pub use fingerprint::{dedup_key, fingerprint};
pub use summary::{ContradictionKind, DiscoverySummary, TrendDirection, TrendShape};
pub use types::{Discovery, DiscoveryCandidate, DiscoveryError, DiscoveryId, DiscoveryType};

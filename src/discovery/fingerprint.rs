//! Stable dedup fingerprints

use super::evidence::EvidenceRef;
use super::types::DiscoveryType;
use sha2::{Digest, Sha256};

/// SHA-256 over `|`-terminated parts, hex encoded.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    format!("{:x}", hasher.finalize())
}

/// Dedup key for a discovery: its type plus the sorted, distinct evidence set.
///
/// Evidence order and repetition do not change the key, so a re-detection
/// that lists the same members in a different order maps to the same record.
pub fn dedup_key(discovery_type: DiscoveryType, evidence: &[EvidenceRef]) -> String {
    let mut keys: Vec<String> = evidence.iter().map(EvidenceRef::normalized_key).collect();
    keys.sort();
    keys.dedup();

    let mut parts: Vec<&str> = Vec::with_capacity(keys.len() + 1);
    parts.push(discovery_type.as_str());
    parts.extend(keys.iter().map(String::as_str));
    fingerprint(&parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_deterministic() {
        assert_eq!(fingerprint(&["a", "b"]), fingerprint(&["a", "b"]));
        assert_ne!(fingerprint(&["a", "b"]), fingerprint(&["ab"]));
    }

    #[test]
    fn dedup_key_ignores_order_and_repeats() {
        let forward = vec![EvidenceRef::document("d1"), EvidenceRef::document("d2")];
        let shuffled = vec![
            EvidenceRef::document("d2"),
            EvidenceRef::document("d1"),
            EvidenceRef::document("d2"),
        ];
        assert_eq!(
            dedup_key(DiscoveryType::Pattern, &forward),
            dedup_key(DiscoveryType::Pattern, &shuffled)
        );
    }

    #[test]
    fn dedup_key_depends_on_type() {
        let evidence = vec![EvidenceRef::document("d1")];
        assert_ne!(
            dedup_key(DiscoveryType::Pattern, &evidence),
            dedup_key(DiscoveryType::Anomaly, &evidence)
        );
    }
}

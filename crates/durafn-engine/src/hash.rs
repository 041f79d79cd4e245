//! Step identity: hashing logical IDs into stable step IDs and the
//! per-invocation counter behind automatic indexing.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;

/// A hashed step identifier: 40 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Validates the `^[a-f0-9]{40}$` shape.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 40
            && s.bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps a wire key without shape validation.
    pub(crate) fn raw(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash a canonical (possibly index-suffixed) step ID. Pure: identical
/// inputs produce identical hashes across processes.
pub fn hash_step_id(unhashed: &str) -> StepId {
    let mut hasher = Sha1::new();
    hasher.update(unhashed.as_bytes());
    StepId(format!("{:x}", hasher.finalize()))
}

/// Per-invocation occurrence counter implementing automatic indexing:
/// the first use of a logical ID hashes verbatim, the nth (n >= 2)
/// hashes `"<id>:<n-1>"`.
#[derive(Debug, Default)]
pub struct StepIdIndexer {
    counts: HashMap<String, u32>,
}

impl StepIdIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the hashed ID for the next occurrence of `logical_id`
    /// together with its 1-based occurrence number.
    pub fn next(&mut self, logical_id: &str) -> (StepId, u32) {
        let count = self.counts.entry(logical_id.to_string()).or_insert(0);
        *count += 1;
        let occurrence = *count;

        let hashed = if occurrence == 1 {
            hash_step_id(logical_id)
        } else {
            hash_step_id(&format!("{logical_id}:{}", occurrence - 1))
        };

        (hashed, occurrence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            hash_step_id("A").as_str(),
            "6dcd4ce23d88e2ee9568ba546c007c63d9131c1b"
        );
        assert_eq!(
            hash_step_id("B").as_str(),
            "ae4f281df5a5d0ff3cad6371f76d5c29b6d953ec"
        );
        assert_eq!(
            hash_step_id("A:1").as_str(),
            "3c782d85a10d2b0600979de846390aae2b5b50ba"
        );
    }

    #[test]
    fn test_shape_invariant() {
        for id in ["A", "my-step", "", "日本語"] {
            let hashed = hash_step_id(id);
            assert_eq!(hashed.as_str().len(), 40);
            assert!(StepId::parse(hashed.as_str()).is_some());
        }
    }

    #[test]
    fn test_parse_rejects_bad_ids() {
        assert!(StepId::parse("abc").is_none());
        assert!(StepId::parse(&"A".repeat(40)).is_none());
        assert!(StepId::parse(&"g".repeat(40)).is_none());
    }

    #[test]
    fn test_indexing_appends_suffixes() {
        let mut indexer = StepIdIndexer::new();

        let (first, n1) = indexer.next("A");
        let (second, n2) = indexer.next("A");
        let (third, n3) = indexer.next("A");

        assert_eq!((n1, n2, n3), (1, 2, 3));
        assert_eq!(first, hash_step_id("A"));
        assert_eq!(second, hash_step_id("A:1"));
        assert_eq!(third, hash_step_id("A:2"));
    }

    #[test]
    fn test_indexing_is_per_logical_id() {
        let mut indexer = StepIdIndexer::new();

        let (a1, _) = indexer.next("A");
        let (b1, _) = indexer.next("B");
        let (a2, _) = indexer.next("A");

        assert_eq!(a1, hash_step_id("A"));
        assert_eq!(b1, hash_step_id("B"));
        assert_eq!(a2, hash_step_id("A:1"));
    }
}

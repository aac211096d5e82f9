//! Call identifiers.
//!
//! Identifiers are emitted as incrementing integers starting at 1. Replies may
//! carry them back as either a JSON number or a JSON string, so both forms
//! resolve to the same numeric key.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Identifier of a call, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl RequestId {
    /// Numeric key used by the pending-call registry.
    ///
    /// Returns `None` for non-numeric strings and for the reserved value 0;
    /// neither can match a call this client issued.
    pub fn as_u64(&self) -> Option<u64> {
        let value = match self {
            RequestId::Number(n) => *n,
            RequestId::String(s) => {
                let n: u64 = s.parse().ok()?;
                // Only the canonical decimal form we emit can match
                if n.to_string() != *s {
                    return None;
                }
                n
            }
        };
        (value != 0).then_some(value)
    }

    /// True when the identifier carries nothing a caller could have issued.
    pub fn is_absent(&self) -> bool {
        match self {
            RequestId::Number(n) => *n == 0,
            RequestId::String(s) => s.trim().is_empty(),
        }
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        RequestId::Number(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// Process-wide source of unique call identifiers.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next identifier. Never returns 0.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(IdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..1000).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 8000);
        assert!(!seen.contains(&0));
    }

    #[test]
    fn test_request_id_accepts_number_or_string() {
        let number: RequestId = serde_json::from_str("7").unwrap();
        let string: RequestId = serde_json::from_str("\"7\"").unwrap();

        assert_eq!(number, RequestId::Number(7));
        assert_eq!(string, RequestId::String("7".to_string()));
        assert_eq!(number.as_u64(), Some(7));
        assert_eq!(string.as_u64(), Some(7));
    }

    #[test]
    fn test_request_id_absent_values() {
        assert!(RequestId::Number(0).is_absent());
        assert!(RequestId::String(String::new()).is_absent());
        assert!(RequestId::String("  ".to_string()).is_absent());
        assert!(!RequestId::Number(1).is_absent());

        assert_eq!(RequestId::Number(0).as_u64(), None);
        assert_eq!(RequestId::String("abc".to_string()).as_u64(), None);
    }

    #[test]
    fn test_request_id_string_must_be_canonical() {
        for raw in ["+7", " 7 ", "007", "7 ", "0"] {
            assert_eq!(RequestId::String(raw.to_string()).as_u64(), None, "{:?}", raw);
        }
        assert_eq!(RequestId::String("70".to_string()).as_u64(), Some(70));
    }

    #[test]
    fn test_request_id_serializes_as_scalar() {
        let json = serde_json::to_string(&RequestId::from(42)).unwrap();
        assert_eq!(json, "42");
    }
}

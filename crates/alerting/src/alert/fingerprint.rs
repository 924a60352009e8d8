use aimon_common::LabelSet;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable identity of a (rule, label set) pair; the dedup key everywhere
/// downstream of the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn of(rule_name: &str, labels: &LabelSet) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(rule_name.as_bytes());
        hasher.update([0xff]);
        for (k, v) in labels.iter() {
            hasher.update(k.as_bytes());
            hasher.update([0xfe]);
            hasher.update(v.as_bytes());
            hasher.update([0xff]);
        }
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(head))
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().copied().collect()
    }

    #[test]
    fn deterministic() {
        let l = labels(&[("instance", "h1"), ("job", "api")]);
        assert_eq!(Fingerprint::of("cpu_high", &l), Fingerprint::of("cpu_high", &l));
    }

    #[test]
    fn rule_and_labels_both_matter() {
        let l = labels(&[("instance", "h1")]);
        let other = labels(&[("instance", "h2")]);
        assert_ne!(Fingerprint::of("a", &l), Fingerprint::of("b", &l));
        assert_ne!(Fingerprint::of("a", &l), Fingerprint::of("a", &other));
    }

    #[test]
    fn separators_prevent_concatenation_collisions() {
        let a = labels(&[("ab", "c")]);
        let b = labels(&[("a", "bc")]);
        assert_ne!(Fingerprint::of("r", &a), Fingerprint::of("r", &b));
    }

    #[test]
    fn renders_as_hex() {
        let s = Fingerprint::from_u64(0xabc).to_string();
        assert_eq!(s, "0000000000000abc");
        assert_eq!(serde_json::to_string(&Fingerprint::from_u64(1)).unwrap(), "\"0000000000000001\"");
    }
}

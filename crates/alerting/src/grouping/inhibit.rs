use aimon_common::LabelSet;
use std::collections::BTreeMap;

use crate::alert::Fingerprint;
use crate::routing::{all_match, Matcher};

/// Mutes alerts matching `target` while another alert matching `source`
/// fires with the same values for every `equal` label.
#[derive(Debug, Clone, PartialEq)]
pub struct InhibitRule {
    pub source: Vec<Matcher>,
    pub target: Vec<Matcher>,
    pub equal: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Inhibitor {
    rules: Vec<InhibitRule>,
}

impl Inhibitor {
    pub fn new(rules: Vec<InhibitRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_target(&self, labels: &LabelSet) -> bool {
        self.rules.iter().any(|r| all_match(&r.target, labels))
    }

    /// Index of the first rule muting the alert `fp`, if any. `firing` holds
    /// every currently firing alert; `fp` itself is never its own source.
    pub fn inhibited_by(
        &self,
        fp: Fingerprint,
        labels: &LabelSet,
        firing: &BTreeMap<Fingerprint, LabelSet>,
    ) -> Option<usize> {
        self.rules.iter().position(|rule| {
            all_match(&rule.target, labels)
                && firing.iter().any(|(src_fp, src)| {
                    *src_fp != fp && all_match(&rule.source, src) && src.equal_on(labels, &rule.equal)
                })
        })
    }
}

mod engine;
mod group;
mod inhibit;

pub use engine::{GroupRegistry, GroupingEngine};
pub use group::{AlertGroup, GroupKey, GroupMember, GroupSummary, MemberChange};
pub use inhibit::{InhibitRule, Inhibitor};

#[cfg(test)]
pub(crate) use group::testing;

mod matcher;
mod notification;
mod router;
mod timer;
mod tree;

pub use matcher::{all_match, MatchOp, Matcher, MatcherError};
pub use notification::{rfc3339, Notification, NotificationStatus};
pub use router::NotificationRouter;
pub use timer::TimerQueue;
pub use tree::{Route, RouteTiming, RoutingTree};

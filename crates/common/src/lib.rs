pub mod backoff;
pub mod clock;
pub mod labels;
pub mod signing;

pub use labels::LabelSet;

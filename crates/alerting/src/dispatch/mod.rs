mod pool;

pub use pool::{DispatchConfig, DispatchError, DispatchPool};

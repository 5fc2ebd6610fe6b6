pub mod defaults;
pub mod settings;

pub use settings::{ExecutionOrder, OverflowPolicy, Settings};

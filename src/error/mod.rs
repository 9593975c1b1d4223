mod types;

pub use types::{Result, TklockError};

pub mod cache;
pub mod codec;
pub mod config;
pub mod records;
pub mod types;

#[cfg(test)]
pub mod tests;

pub use cache::*;
pub use codec::{CacheKey, Frame};
pub use config::*;
pub use types::*;

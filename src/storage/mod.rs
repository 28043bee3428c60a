pub mod cache;
pub mod catalog;

pub use cache::{CacheKey, TtlCache};
pub use catalog::CatalogStore;

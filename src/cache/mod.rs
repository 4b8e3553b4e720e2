pub mod framework_cache;

pub use framework_cache::{ExtractStore, FrameworkCache, InMemoryExtractStore};

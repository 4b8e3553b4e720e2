pub mod job_store;

pub use job_store::{InMemoryJobBackend, JobBackend, JobPatch, JobStore};

//! sealbox-storage: object store abstraction for the encryption client
//!
//! One trait, two backends: an OpenDAL S3 operator for real deployments and
//! an in-memory store for tests and local tooling.

pub mod operator;
pub mod store;

pub use operator::{build_operator, OpendalStore};
pub use store::{MemoryStore, ObjectStat, ObjectStore, StoredObject};

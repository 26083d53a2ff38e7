pub mod memory;
pub mod postgres;
pub mod types;

pub use memory::{MemoryStore, Table};
pub use postgres::{PgStore, PgStoreConfig};
pub use types::{DeploymentGrant, InstanceRecord, NewInstance, Store, StoreError};

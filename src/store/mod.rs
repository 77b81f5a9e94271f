pub mod filestore;
pub mod memory;

pub use filestore::FileThreadStore;
pub use memory::MemoryThreadStore;
pub use podcore::store::error::{Result, StoreError};
pub use podcore::store::traits::ThreadSnapshotStore;

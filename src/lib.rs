// Core data model and algorithms are re-exported for convenience
pub use podcore::{request, sdk, types as model, window};

pub mod types {
    pub mod events;
}

pub mod client;
pub mod config;
pub mod mock;
pub mod pagination;
pub mod store;
pub mod threads;

pub use client::ChatCache;
pub use config::SyncConfig;
pub use pagination::{
    DirectionState, DropReason, FetchError, JumpAnchor, JumpOutcome, PageOutcome,
    PaginationController,
};
pub use threads::{ThreadError, ThreadListCache};

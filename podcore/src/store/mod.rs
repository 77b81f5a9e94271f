pub mod error;
pub mod traits;

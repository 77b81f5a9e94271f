pub mod message;
pub mod thread;

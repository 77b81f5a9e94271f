pub mod request;
pub mod sdk;
pub mod store;
pub mod types;
pub mod window;

pub use request::{Direction, RequestIdGenerator, RequestKey, RequestKeys, RequestKind, SessionId};
pub use types::message::{Message, MessageId, MessageRow, ReceiptState, StatusIcon};
pub use types::thread::{ConversationSummary, LastMessage, ThreadFlag, ThreadId, ThreadMutation};
pub use window::{
    Edge, InsertReport, MessageSection, MessageWindow, ReconcileOutcome, RowPlacement, WindowError,
};

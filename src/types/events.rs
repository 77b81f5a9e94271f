use podcore::sdk::SdkError;
use podcore::{ConversationSummary, MessageId, RequestKey, RequestKind, ThreadId, ThreadMutation};
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with one broadcast channel per event family.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (threads, Arc<ThreadEvent>),
    (history, Arc<HistoryEvent>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    // A send only fails when nobody is subscribed, which is fine.
    pub(crate) fn emit_thread(&self, event: ThreadEvent) {
        let _ = self.threads.send(Arc::new(event));
    }

    pub(crate) fn emit_history(&self, event: HistoryEvent) {
        let _ = self.history.send(Arc::new(event));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThreadEvent {
    /// A summary changed locally, optimistically or after confirmation.
    Updated(ConversationSummary),
    /// The list order was recomputed.
    Reordered(Vec<ThreadId>),
    /// The server declined a flag change and the flag was reverted.
    MutationRejected {
        thread_id: ThreadId,
        mutation: ThreadMutation,
        error: SdkError,
    },
    Removed(ThreadId),
    Cleared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEvent {
    pub thread_id: ThreadId,
    pub kind: HistoryEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEventKind {
    PageApplied {
        kind: RequestKind,
        inserted: usize,
        replaced: usize,
        rejected: usize,
        has_next: bool,
    },
    StaleResponse(RequestKey),
    Highlighted(MessageId),
    Reset,
}

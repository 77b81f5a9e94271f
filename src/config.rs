use std::time::Duration;

/// Tunables for history paging and thread mutations.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Messages requested per top/bottom page.
    pub page_size: usize,
    /// Messages requested on each side of a jump target.
    pub jump_page_size: usize,
    /// Upper bound on a history fetch before the direction is freed again.
    pub request_timeout: Duration,
    /// Upper bound on a pin/mute/archive round trip.
    pub mutation_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 25,
            jump_page_size: 25,
            request_timeout: Duration::from_secs(30),
            mutation_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_jump_page_size(mut self, jump_page_size: usize) -> Self {
        self.jump_page_size = jump_page_size.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_mutation_timeout(mut self, timeout: Duration) -> Self {
        self.mutation_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    messages_received: u64,
    prompt_tokens: u64,
    response_tokens: u64,
    total_tokens: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_message(&mut self) {
        self.messages_received += 1;
    }

    /// Usage metadata reports running totals for the session, so the latest value wins.
    pub(crate) fn update_usage(&mut self, prompt: u32, response: u32, total: u32) {
        self.prompt_tokens = prompt as u64;
        self.response_tokens = response as u64;
        self.total_tokens = total as u64;
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn response_tokens(&self) -> u64 {
        self.response_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }
}

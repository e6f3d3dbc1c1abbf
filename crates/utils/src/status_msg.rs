use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const CAT_STANDARD: &str = "standard";
pub const CAT_COMMAND: &str = "command";
pub const CAT_COMMENT: &str = "comment";
pub const CAT_ERROR: &str = "error";

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    Standard,
    Command,
    Comment,
    Error,
}

/// One progress line published by the porting engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMsg {
    pub category: StatusCategory,
    pub text: String,
}

impl StatusMsg {
    pub fn new(category: StatusCategory, text: impl Into<String>) -> Self {
        Self {
            category,
            text: text.into(),
        }
    }

    pub fn standard(text: impl Into<String>) -> Self {
        Self::new(StatusCategory::Standard, text)
    }

    pub fn command(text: impl Into<String>) -> Self {
        Self::new(StatusCategory::Command, text)
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Self::new(StatusCategory::Comment, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(StatusCategory::Error, text)
    }

    pub fn name(&self) -> &'static str {
        match self.category {
            StatusCategory::Standard => CAT_STANDARD,
            StatusCategory::Command => CAT_COMMAND,
            StatusCategory::Comment => CAT_COMMENT,
            StatusCategory::Error => CAT_ERROR,
        }
    }

    /// Render as a single newline-terminated line with the category markup.
    pub fn render(&self) -> String {
        let prefix = match self.category {
            StatusCategory::Standard => "",
            StatusCategory::Command => "$ ",
            StatusCategory::Comment => "# ",
            StatusCategory::Error => "! ",
        };
        let mut line = String::with_capacity(prefix.len() + self.text.len() + 1);
        line.push_str(prefix);
        line.push_str(self.text.trim_end_matches('\n'));
        line.push('\n');
        line
    }
}

/// Typed publish/subscribe channel carrying [`StatusMsg`] events.
///
/// Publishing never blocks and is a no-op while nobody is subscribed.
#[derive(Clone, Debug)]
pub struct StatusChannel {
    tx: broadcast::Sender<StatusMsg>,
}

impl StatusChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, msg: StatusMsg) {
        let _ = self.tx.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusMsg> {
        self.tx.subscribe()
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

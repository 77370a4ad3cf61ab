use murmur_storage::MessageId;

pub const DELETE_PROMPT_TITLE: &str = "Delete Message";
pub const DELETE_PROMPT_BODY: &str = "Are you sure you want to delete this message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeleteChoice {
    Cancel,
    Confirm,
}

impl DeleteChoice {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cancel => "Cancel",
            Self::Confirm => "Yes",
        }
    }
}

/// Confirmation shown before a delete is issued. Only `Confirm` reaches the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePrompt {
    pub message_id: MessageId,
    pub title: &'static str,
    pub body: &'static str,
}

impl DeletePrompt {
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            title: DELETE_PROMPT_TITLE,
            body: DELETE_PROMPT_BODY,
        }
    }

    pub fn choices(&self) -> [DeleteChoice; 2] {
        [DeleteChoice::Cancel, DeleteChoice::Confirm]
    }
}

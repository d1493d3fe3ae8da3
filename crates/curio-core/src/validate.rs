use serde::{Deserialize, Serialize};

use crate::ids::ConversationId;

pub const MESSAGE_MAX_CHARS: usize = 10_000;
pub const CONTEXT_MAX_CHARS: usize = 5_000;
pub const MAX_CONTEXT_REFERENCES: usize = 12;
pub const REFERENCE_TITLE_MAX_CHARS: usize = 500;
pub const REFERENCE_URL_MAX_CHARS: usize = 2_000;

/// A document or page the client wants considered alongside the message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextReference {
    pub title: String,
    pub url: String,
}

/// Raw trigger request body, exactly as clients send it.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub conversation_id: String,
    pub message: String,
    #[serde(default)]
    pub conversation_context: Option<String>,
    #[serde(default)]
    pub context_references: Option<Vec<ContextReference>>,
}

/// Sanitized parameters after boundary validation. Everything downstream
/// trusts these fields.
#[derive(Clone, Debug)]
pub struct TriggerParams {
    pub conversation_id: ConversationId,
    pub message: String,
    pub conversation_context: Option<String>,
    pub context_references: Vec<ContextReference>,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("conversationId is required")]
    MissingConversationId,
    #[error("message is required and must not be empty")]
    EmptyMessage,
    #[error("message exceeds {max} characters (got {actual})")]
    MessageTooLong { max: usize, actual: usize },
    #[error("conversationContext exceeds {max} characters (got {actual})")]
    ContextTooLong { max: usize, actual: usize },
    #[error("contextReferences exceeds {max} entries (got {actual})")]
    TooManyReferences { max: usize, actual: usize },
    #[error("contextReferences[{index}].title exceeds {max} characters")]
    ReferenceTitleTooLong { index: usize, max: usize },
    #[error("contextReferences[{index}].url exceeds {max} characters")]
    ReferenceUrlTooLong { index: usize, max: usize },
}

/// Strip control characters, keeping newline and tab.
fn strip_control(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

impl TriggerRequest {
    pub fn validate(self) -> Result<TriggerParams, ValidationError> {
        let conversation_id = self.conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(ValidationError::MissingConversationId);
        }

        let message = strip_control(&self.message);
        let message = message.trim().to_string();
        if message.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let message_chars = message.chars().count();
        if message_chars > MESSAGE_MAX_CHARS {
            return Err(ValidationError::MessageTooLong {
                max: MESSAGE_MAX_CHARS,
                actual: message_chars,
            });
        }

        let conversation_context = match self.conversation_context {
            Some(raw) => {
                let cleaned = strip_control(&raw);
                let cleaned = cleaned.trim().to_string();
                let chars = cleaned.chars().count();
                if chars > CONTEXT_MAX_CHARS {
                    return Err(ValidationError::ContextTooLong {
                        max: CONTEXT_MAX_CHARS,
                        actual: chars,
                    });
                }
                if cleaned.is_empty() { None } else { Some(cleaned) }
            }
            None => None,
        };

        let refs = self.context_references.unwrap_or_default();
        if refs.len() > MAX_CONTEXT_REFERENCES {
            return Err(ValidationError::TooManyReferences {
                max: MAX_CONTEXT_REFERENCES,
                actual: refs.len(),
            });
        }
        let mut context_references = Vec::with_capacity(refs.len());
        for (index, r) in refs.into_iter().enumerate() {
            let title = strip_control(&r.title).trim().to_string();
            let url = r.url.trim().to_string();
            if title.chars().count() > REFERENCE_TITLE_MAX_CHARS {
                return Err(ValidationError::ReferenceTitleTooLong {
                    index,
                    max: REFERENCE_TITLE_MAX_CHARS,
                });
            }
            if url.chars().count() > REFERENCE_URL_MAX_CHARS {
                return Err(ValidationError::ReferenceUrlTooLong {
                    index,
                    max: REFERENCE_URL_MAX_CHARS,
                });
            }
            context_references.push(ContextReference { title, url });
        }

        Ok(TriggerParams {
            conversation_id: ConversationId::from_raw(conversation_id),
            message,
            conversation_context,
            context_references,
        })
    }
}

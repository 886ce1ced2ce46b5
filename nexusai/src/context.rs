//! Context window construction: decides which messages accompany a request
//! and formats them for the wire, injecting prior summaries when history
//! exceeds the budget. Pure transforms, no I/O.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::types::{ContextSummary, Message, Role, Settings, DEFAULT_CONTEXT_MESSAGES};

pub const SUMMARY_LABEL: &str = "Previous conversation context:";

// ---------------------------------------------------------------------------
// Wire message shapes (OpenAI messages-array format)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl WireContent {
    /// Text view of the content: the string itself, or the text parts of a
    /// multimodal message joined (images ignored).
    pub fn text(&self) -> String {
        match self {
            WireContent::Text(text) => text.clone(),
            WireContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: WireContent,
}

impl WireMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: WireContent::Text(content.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Context building
// ---------------------------------------------------------------------------

/// Build the message list for one request.
///
/// Messages lacking content or role are dropped. Within the budget the
/// remainder passes through unchanged; over budget, the newest `budget`
/// messages are kept and any stored summaries are folded into one synthetic
/// system message placed first.
pub fn build_context(
    all_messages: &[Message],
    settings: &Settings,
    stored_summaries: &[ContextSummary],
) -> Vec<WireMessage> {
    let budget = if settings.context_messages == 0 {
        DEFAULT_CONTEXT_MESSAGES
    } else {
        settings.context_messages
    };

    let valid: Vec<&Message> = all_messages
        .iter()
        .filter(|msg| !msg.content.is_empty())
        .collect();

    if valid.len() <= budget {
        return format_for_api(&valid);
    }

    let recent = &valid[valid.len() - budget..];
    let mut context = Vec::with_capacity(recent.len() + 1);

    if !stored_summaries.is_empty() {
        let summary_text = stored_summaries
            .iter()
            .map(|s| s.summary.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        context.push(WireMessage::text(
            Role::System,
            format!("{SUMMARY_LABEL}\n{summary_text}"),
        ));
    }

    context.extend(format_for_api(recent));
    context
}

static ATTACHMENT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n*---\n\*\*Attached Files:\*\*\n(\n\[Image: [^\]]+\]\n?)+")
        .expect("attachment block pattern")
});

/// Format messages for the wire. Messages carrying image attachments become
/// multimodal vision content: the text (with the attachment-placeholder
/// block stripped) as a text part, then one image part per attachment.
fn format_for_api(messages: &[&Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|msg| {
            if msg.images.is_empty() {
                return WireMessage::text(msg.role, msg.content.clone());
            }

            let mut parts = Vec::with_capacity(msg.images.len() + 1);
            let text = ATTACHMENT_BLOCK.replace_all(&msg.content, "");
            let text = text.trim();
            if !text.is_empty() {
                parts.push(ContentPart::Text {
                    text: text.to_string(),
                });
            }
            for image in &msg.images {
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data.clone(),
                    },
                });
            }

            WireMessage {
                role: msg.role,
                content: WireContent::Parts(parts),
            }
        })
        .collect()
}

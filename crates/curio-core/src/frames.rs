use serde::{Deserialize, Serialize};

use crate::ids::MessageId;
use crate::validate::ContextReference;

/// Pipeline stage announced by progress frames.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    Planning,
    Searching,
    Scraping,
    Generating,
}

impl std::fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GenerationStage::Planning => "planning",
            GenerationStage::Searching => "searching",
            GenerationStage::Scraping => "scraping",
            GenerationStage::Generating => "generating",
        };
        f.write_str(s)
    }
}

/// A cited source as shown to clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Typed frames delivered to clients and the persistence layer, strictly in
/// generation order. Exactly one terminal frame (`complete` or `error`) is
/// delivered per generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamFrame {
    #[serde(rename = "progress")]
    Progress {
        stage: GenerationStage,
        message: String,
    },

    #[serde(rename = "reasoning")]
    Reasoning { content: String },

    #[serde(rename = "content")]
    Content {
        #[serde(skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },

    #[serde(rename = "tool_result", rename_all = "camelCase")]
    ToolResult {
        tool_name: String,
        result: serde_json::Value,
        duration_ms: u64,
    },

    #[serde(rename = "metadata", rename_all = "camelCase")]
    Metadata {
        sources: Vec<SourceRef>,
        context_references: Vec<ContextReference>,
        confidence: f32,
        completeness: f32,
    },

    #[serde(rename = "error")]
    Error { error: String },

    #[serde(rename = "complete", rename_all = "camelCase")]
    Complete {
        message_id: MessageId,
        content: String,
        sources: Vec<SourceRef>,
    },
}

impl StreamFrame {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Content {
            delta: Some(text.into()),
            content: None,
        }
    }

    pub fn full_content(text: impl Into<String>) -> Self {
        Self::Content {
            delta: None,
            content: Some(text.into()),
        }
    }

    pub fn progress(stage: GenerationStage, message: impl Into<String>) -> Self {
        Self::Progress {
            stage,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Reasoning { .. } => "reasoning",
            Self::Content { .. } => "content",
            Self::ToolResult { .. } => "tool_result",
            Self::Metadata { .. } => "metadata",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }
}

/// A frame stamped with its persisted sequence number. Live subscribers use
/// the sequence to dedup against replayed history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SequencedFrame {
    pub sequence: i64,
    #[serde(flatten)]
    pub frame: StreamFrame,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_frames() {
        assert!(StreamFrame::Error { error: "x".into() }.is_terminal());
        assert!(StreamFrame::Complete {
            message_id: MessageId::new(),
            content: "done".into(),
            sources: vec![],
        }
        .is_terminal());
        assert!(!StreamFrame::delta("hi").is_terminal());
        assert!(!StreamFrame::Reasoning { content: "hm".into() }.is_terminal());
    }

    #[test]
    fn frame_type_matches_serde_tag() {
        let frames = vec![
            StreamFrame::progress(GenerationStage::Planning, "planning"),
            StreamFrame::Reasoning { content: "c".into() },
            StreamFrame::delta("d"),
            StreamFrame::ToolResult {
                tool_name: "web_search".into(),
                result: serde_json::json!({"count": 3}),
                duration_ms: 120,
            },
            StreamFrame::Error { error: "boom".into() },
        ];
        for f in &frames {
            let json = serde_json::to_value(f).unwrap();
            assert_eq!(json["type"], f.frame_type());
        }
    }

    #[test]
    fn tool_result_uses_camel_case_fields() {
        let f = StreamFrame::ToolResult {
            tool_name: "web_search".into(),
            result: serde_json::json!({}),
            duration_ms: 42,
        };
        let json = serde_json::to_value(&f).unwrap();
        assert!(json.get("toolName").is_some());
        assert!(json.get("durationMs").is_some());
    }

    #[test]
    fn content_frame_omits_absent_fields() {
        let json = serde_json::to_value(StreamFrame::delta("hi")).unwrap();
        assert_eq!(json["delta"], "hi");
        assert!(json.get("content").is_none());

        let json = serde_json::to_value(StreamFrame::full_content("all")).unwrap();
        assert_eq!(json["content"], "all");
        assert!(json.get("delta").is_none());
    }

    #[test]
    fn frame_serde_roundtrip() {
        let frames = vec![
            StreamFrame::progress(GenerationStage::Searching, "searching the web"),
            StreamFrame::Metadata {
                sources: vec![SourceRef {
                    title: "Docs".into(),
                    url: "https://docs.rs".into(),
                    domain: Some("docs.rs".into()),
                }],
                context_references: vec![],
                confidence: 0.8,
                completeness: 1.0,
            },
            StreamFrame::Complete {
                message_id: MessageId::from_raw("msg_1"),
                content: "answer".into(),
                sources: vec![],
            },
        ];
        for f in &frames {
            let json = serde_json::to_string(f).unwrap();
            let parsed: StreamFrame = serde_json::from_str(&json).unwrap();
            let json2 = serde_json::to_string(&parsed).unwrap();
            assert_eq!(json, json2);
        }
    }

    #[test]
    fn sequenced_frame_flattens() {
        let sf = SequencedFrame {
            sequence: 7,
            frame: StreamFrame::delta("x"),
        };
        let json = serde_json::to_value(&sf).unwrap();
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["type"], "content");
        assert_eq!(json["delta"], "x");
    }
}

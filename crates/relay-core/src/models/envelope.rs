use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Which kind of worker output a recovered JSON object looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeTag {
    Email,
    Energy,
    Unknown,
}

/// A JSON object recovered from free-form worker text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveredCandidate {
    /// Byte range within the (sanitized) text the candidate was parsed from.
    pub span: Range<usize>,
    /// Array indices leading from the recovered root to this object.
    pub path: Vec<usize>,
    pub shape: ShapeTag,
    pub json: serde_json::Map<String, serde_json::Value>,
}

/// What the normalizer did with one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentAction {
    Inlined,
    Omitted,
    NoContent,
}

impl AttachmentAction {
    /// Inlining policy: `inlined` iff `0 < size <= threshold`, `omitted` iff
    /// `size > threshold`, `no_content` otherwise.
    pub fn for_size(size_bytes: u64, inline_threshold_bytes: u64) -> Self {
        if size_bytes == 0 {
            AttachmentAction::NoContent
        } else if size_bytes <= inline_threshold_bytes {
            AttachmentAction::Inlined
        } else {
            AttachmentAction::Omitted
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentAction::Inlined => "inlined",
            AttachmentAction::Omitted => "omitted",
            AttachmentAction::NoContent => "no_content",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_base64: Option<String>,
    pub action: AttachmentAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDiagnostic {
    pub filename: String,
    pub original_size_bytes: u64,
    pub action: AttachmentAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The normalized, policy-applied envelope handed to the sender stage.
///
/// Constructed once by the normalizer; fields are read-only afterwards.
/// The serialized form uses the snake_case keys downstream mail connectors
/// expect, and feeding it back through recovery + normalization reproduces
/// the same recipients, subject, body and attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDispatchEnvelope {
    email_to: Vec<String>,
    #[serde(rename = "email_subject")]
    subject: String,
    #[serde(rename = "email_body_html")]
    body_html: String,
    attachments: Vec<AttachmentDescriptor>,
    diagnostics: Vec<AttachmentDiagnostic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    energy: Option<serde_json::Value>,
    #[serde(rename = "data")]
    data_mirror: serde_json::Value,
}

impl CanonicalDispatchEnvelope {
    /// Assemble an envelope and derive its flat `data` mirror.
    ///
    /// Attachments and diagnostics must be parallel; the normalizer is the
    /// only producer and always pushes them in pairs.
    pub(crate) fn assemble(
        email_to: Vec<String>,
        subject: String,
        body_html: String,
        attachments: Vec<AttachmentDescriptor>,
        diagnostics: Vec<AttachmentDiagnostic>,
        energy: Option<serde_json::Value>,
    ) -> Self {
        debug_assert_eq!(attachments.len(), diagnostics.len());
        let data_mirror = serde_json::json!({
            "email_to": email_to,
            "email_to_str": email_to.join(","),
            "email_subject": subject,
            "email_body_html": body_html,
            "attachments": attachments,
        });
        Self {
            email_to,
            subject,
            body_html,
            attachments,
            diagnostics,
            energy,
            data_mirror,
        }
    }

    pub fn email_to(&self) -> &[String] {
        &self.email_to
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body_html(&self) -> &str {
        &self.body_html
    }

    pub fn attachments(&self) -> &[AttachmentDescriptor] {
        &self.attachments
    }

    pub fn diagnostics(&self) -> &[AttachmentDiagnostic] {
        &self.diagnostics
    }

    pub fn energy(&self) -> Option<&serde_json::Value> {
        self.energy.as_ref()
    }

    pub fn data_mirror(&self) -> &serde_json::Value {
        &self.data_mirror
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

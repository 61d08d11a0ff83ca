//! Reviewer decisions and their content rules

use serde::{Deserialize, Serialize};

use super::batch::BatchRef;
use crate::error::{AppError, Result};
use crate::models::{Attachment, AttachmentKind, Decision};

/// Most images a single revision request may carry
pub const MAX_IMAGES: usize = 5;

/// Longest voice note a revision request may carry
pub const MAX_AUDIO_SECS: u32 = 120;

/// A decision as submitted by a reviewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub batch: BatchRef,
    pub decision: Decision,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl DecisionRequest {
    pub fn approve(batch: BatchRef) -> Self {
        Self {
            batch,
            decision: Decision::Approved,
            notes: None,
            attachments: Vec::new(),
        }
    }

    pub fn request_revision(batch: BatchRef, notes: impl Into<String>) -> Self {
        Self {
            batch,
            decision: Decision::RevisionRequested,
            notes: Some(notes.into()),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Notes trimmed, with blank notes treated as absent
    pub fn normalized_notes(&self) -> Option<String> {
        self.notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
    }

    /// Check attachment limits and that a revision request says something
    pub fn validate(&self) -> Result<()> {
        validate_attachments(&self.attachments)?;
        if self.decision == Decision::RevisionRequested
            && self.normalized_notes().is_none()
            && self.attachments.is_empty()
        {
            return Err(AppError::EmptyFeedback);
        }
        Ok(())
    }
}

pub fn validate_attachments(attachments: &[Attachment]) -> Result<()> {
    let images = attachments
        .iter()
        .filter(|a| a.kind == AttachmentKind::Image)
        .count();
    if images > MAX_IMAGES {
        return Err(AppError::Validation(format!(
            "At most {} images per decision, got {}",
            MAX_IMAGES, images
        )));
    }

    let audio: Vec<&Attachment> = attachments
        .iter()
        .filter(|a| a.kind == AttachmentKind::Audio)
        .collect();
    if audio.len() > 1 {
        return Err(AppError::Validation(
            "At most one audio clip per decision".to_string(),
        ));
    }
    if let Some(clip) = audio.first() {
        match clip.duration_secs {
            None => {
                return Err(AppError::Validation(
                    "Audio clips must carry a duration".to_string(),
                ))
            }
            Some(secs) if secs > MAX_AUDIO_SECS => {
                return Err(AppError::Validation(format!(
                    "Audio clips are limited to {} seconds",
                    MAX_AUDIO_SECS
                )))
            }
            Some(_) => {}
        }
    }

    if attachments.iter().any(|a| a.reference.trim().is_empty()) {
        return Err(AppError::Validation(
            "Attachment reference cannot be empty".to_string(),
        ));
    }
    Ok(())
}

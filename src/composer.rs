use crate::controller::OutgoingMessage;
use crate::error::{ChatError, Result};
use base64::prelude::*;
use std::path::Path;

/// Text and image the user is preparing but has not sent yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputDraft {
    text: String,
    image: Option<String>,
}

impl InputDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.image.is_none()
    }

    /// Appends recognized speech, separated from existing text by one space.
    pub fn append_transcript(&mut self, transcript: &str) {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return;
        }
        let existing = self.text.trim();
        self.text = if existing.is_empty() {
            transcript.to_string()
        } else {
            format!("{} {}", existing, transcript)
        };
    }

    /// Appends a typed line. Text already in the draft, dictated or typed, stays
    /// in front of it.
    pub fn append_text(&mut self, text: &str) {
        let existing = self.text.trim_end();
        self.text = if existing.is_empty() {
            text.to_string()
        } else {
            format!("{} {}", existing, text.trim_start())
        };
    }

    /// Reads an image file into a data URL and attaches it, replacing any
    /// previous attachment. Only `image/*` files are accepted.
    pub async fn attach_image(&mut self, path: &Path) -> Result<()> {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        if mime.type_() != mime_guess::mime::IMAGE {
            return Err(ChatError::Validation(format!(
                "{} is not an image ({})",
                path.display(),
                mime
            )));
        }

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ChatError::Validation(format!("failed to read {}: {}", path.display(), e))
        })?;
        log::info!("Attached {} ({}, {} bytes)", path.display(), mime, bytes.len());
        self.image = Some(to_data_url(mime.essence_str(), &bytes));
        Ok(())
    }

    pub fn clear_image(&mut self) {
        self.image = None;
    }

    /// Hands the draft over for sending and leaves it empty.
    pub fn take(&mut self) -> OutgoingMessage {
        let draft = std::mem::take(self);
        OutgoingMessage {
            text: draft.text,
            image: draft.image,
        }
    }
}

pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64_STANDARD.encode(bytes))
}

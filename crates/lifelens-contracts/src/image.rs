use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// One user-supplied option. Image options carry the raw upload; text options
/// (enumerated choices without a photo) carry an empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub payload: Arc<[u8]>,
    pub label: String,
    pub caption: Option<String>,
}

impl ImageInput {
    pub fn new(payload: impl Into<Arc<[u8]>>, label: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            label: label.into(),
            caption: None,
        }
    }

    pub fn text_option(label: impl Into<String>) -> Self {
        Self::new(Vec::new(), label)
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        let caption = caption.into();
        self.caption = (!caption.trim().is_empty()).then_some(caption);
        self
    }

    pub fn is_text_option(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Hex sha256 of the payload bytes.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.payload);
        hex::encode(hasher.finalize())
    }
}

// Payload bytes never leave the process through serde; records keep the
// fingerprint and size instead.
impl Serialize for ImageInput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ImageInput", 4)?;
        state.serialize_field("label", &self.label)?;
        state.serialize_field("caption", &self.caption)?;
        state.serialize_field("bytes", &self.payload.len())?;
        state.serialize_field("fingerprint", &self.fingerprint())?;
        state.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceProvider {
    OpenaiVision,
    GeminiVision,
    HuggingfaceVision,
    Heuristic,
    UserText,
    None,
}

impl SourceProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenaiVision => "openai_vision",
            Self::GeminiVision => "gemini_vision",
            Self::HuggingfaceVision => "huggingface_vision",
            Self::Heuristic => "heuristic",
            Self::UserText => "user_text",
            Self::None => "none",
        }
    }

    /// Descriptions from remote models are worth memoizing; local ones are
    /// cheaper to recompute than to pin.
    pub fn is_remote(self) -> bool {
        matches!(
            self,
            Self::OpenaiVision | Self::GeminiVision | Self::HuggingfaceVision
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub label: String,
    pub description: String,
    pub source_provider: SourceProvider,
    pub success: bool,
}

impl ImageDescriptor {
    pub fn described(
        label: impl Into<String>,
        description: impl Into<String>,
        source_provider: SourceProvider,
    ) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
            source_provider,
            success: true,
        }
    }

    pub fn failed(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
            source_provider: SourceProvider::None,
            success: false,
        }
    }
}

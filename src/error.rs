/// Error type shared by the texture pipeline and the preset codec.
///
/// Recoverable failures (a single undecodable image, a mask on a degenerate
/// buffer) are handed back as warnings next to a usable result; only preset
/// schema/usage errors and persistence failures abort an operation.
#[derive(Debug)]
pub enum PipelineError {
    /// Mask requested for a buffer with a zero-sized axis.
    InvalidDimensions { width: u32, height: u32 },
    /// Source bytes could not be turned into pixels.
    ImageDecode(String),
    /// Composited pixels could not be encoded back to PNG.
    ImageEncode(String),
    /// Preset written by a newer schema than this build understands.
    UnsupportedSchema { found: String, supported: String },
    /// Settings-only presets carry no images and can only be applied.
    SettingsOnlyCannotLoad,
    /// No preset with this id in the library.
    PresetNotFound(i64),
    Serialize(String),
    Io(std::io::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::InvalidDimensions { width, height } => {
                write!(f, "Invalid mask dimensions {}x{}", width, height)
            }
            PipelineError::ImageDecode(e) => write!(f, "Image decode error: {}", e),
            PipelineError::ImageEncode(e) => write!(f, "Image encode error: {}", e),
            PipelineError::UnsupportedSchema { found, supported } => write!(
                f,
                "Preset schema {} is newer than supported schema {}",
                found, supported
            ),
            PipelineError::SettingsOnlyCannotLoad => write!(
                f,
                "Settings-only preset has no images; apply it with a new image instead"
            ),
            PipelineError::PresetNotFound(id) => write!(f, "No preset with id {}", id),
            PipelineError::Serialize(e) => write!(f, "Serialization error: {}", e),
            PipelineError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Serialize(e.to_string())
    }
}

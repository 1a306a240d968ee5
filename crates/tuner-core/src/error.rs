//! Error types for the tuner pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum Error {
    // Manifest errors
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    // Program data errors
    #[error("Invalid program provider data: {0}")]
    ProviderData(String),

    #[error("Unknown source kind: {0}")]
    UnknownSourceKind(String),

    // Renderer errors
    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Audio output failed: {0}")]
    AudioOutput(String),

    // Playback errors
    #[error("Invalid playback state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this error is recoverable by retrying the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ManifestFetch(_) | Error::Network(_) | Error::Io(_)
        )
    }

    /// Short stable code for logs and host-side bucketing
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ManifestFetch(_) => "MANIFEST_FETCH",
            Error::ManifestParse(_) => "MANIFEST_PARSE",
            Error::InvalidManifest(_) => "INVALID_MANIFEST",
            Error::ProviderData(_) => "PROVIDER_DATA",
            Error::UnknownSourceKind(_) => "SOURCE_KIND",
            Error::DecoderInit(_) => "DECODER_INIT",
            Error::Crypto(_) => "CRYPTO",
            Error::AudioOutput(_) => "AUDIO_OUTPUT",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::Network(_) => "NETWORK",
            Error::Internal(_) => "INTERNAL",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::ManifestFetch("timeout".into()).error_code(),
            "MANIFEST_FETCH"
        );
        assert_eq!(
            Error::UnknownSourceKind("RTSP".into()).error_code(),
            "SOURCE_KIND"
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::ManifestFetch("timeout".into()).is_recoverable());
        assert!(!Error::Crypto("bad key".into()).is_recoverable());
        assert!(!Error::ProviderData("empty".into()).is_recoverable());
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("rate limit or quota exhausted: {0}")]
    RateLimited(String),

    #[error("backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum ComicError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no API keys available")]
    NoCredentials,

    #[error("all {attempts} API keys exhausted their quota: {last:#}")]
    AllCredentialsExhausted {
        attempts: usize,
        #[source]
        last: anyhow::Error,
    },

    #[error("backend operation failed: {0:#}")]
    Backend(#[source] anyhow::Error),

    #[error("script generation failed: {0}")]
    ScriptGeneration(String),

    #[error("story analysis failed: {0}")]
    Analysis(String),

    #[error("panel {panel} generation failed: {source}")]
    PanelGeneration {
        panel: u32,
        #[source]
        source: Box<ComicError>,
    },

    #[error("lettering analysis failed for panel {panel}: {source}")]
    LetteringAnalysis {
        panel: u32,
        #[source]
        source: Box<ComicError>,
    },

    #[error("panel {panel} has no image to work with")]
    MissingImage { panel: u32 },
}

impl ComicError {
    /// True when every key in the pool hit its quota, looking through
    /// panel/lettering wrappers.
    pub fn is_quota_exhausted(&self) -> bool {
        match self {
            ComicError::AllCredentialsExhausted { .. } => true,
            ComicError::PanelGeneration { source, .. }
            | ComicError::LetteringAnalysis { source, .. } => source.is_quota_exhausted(),
            _ => false,
        }
    }

    pub fn user_message(&self) -> String {
        if self.is_quota_exhausted() {
            return "All API keys have exhausted their quota. Try again later or add more keys."
                .to_string();
        }
        match self {
            ComicError::PanelGeneration { source, .. }
            | ComicError::LetteringAnalysis { source, .. } => source.user_message(),
            other => other.to_string(),
        }
    }
}

pub type ComicResult<T> = std::result::Result<T, ComicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exhaustion_seen_through_panel_wrapper() {
        let inner = ComicError::AllCredentialsExhausted {
            attempts: 2,
            last: anyhow::anyhow!("429 quota"),
        };
        let err = ComicError::PanelGeneration {
            panel: 3,
            source: Box::new(inner),
        };

        assert!(err.is_quota_exhausted());
        assert!(err.user_message().contains("quota"));
    }

    #[test]
    fn test_backend_error_message_is_not_quota() {
        let err = ComicError::Backend(anyhow::anyhow!("invalid argument"));

        assert!(!err.is_quota_exhausted());
        assert_eq!(err.user_message(), "backend operation failed: invalid argument");
    }
}

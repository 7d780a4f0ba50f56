use thiserror::Error;

/// Failures that end a run. Everything else degrades through a cascade.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("script has no scenes")]
    EmptyScript,

    #[error("scene {index}: narration unavailable after exhausting every provider ({reasons})")]
    NarrationUnavailable { index: usize, reasons: String },

    #[error("narration track has zero duration")]
    ZeroDurationNarration,

    #[error("no scene clips to compose")]
    NoSceneClips,

    #[error("unsupported background media type: {0}")]
    UnsupportedBackground(String),

    #[error("{what}: expected {expected} entries, got {actual}")]
    SceneCountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// A single provider attempt that did not produce a usable artifact.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider}: network failure: {message}")]
    Network { provider: String, message: String },

    #[error("{provider}: rejected with HTTP {status}")]
    Rejected { provider: String, status: u16 },

    #[error("{provider}: invalid output: {message}")]
    InvalidOutput { provider: String, message: String },

    #[error("{provider}: unavailable: {message}")]
    Unavailable { provider: String, message: String },
}

impl ProviderError {
    pub fn network(provider: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Network {
            provider: provider.into(),
            message: err.to_string(),
        }
    }

    pub fn invalid_output(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOutput {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Transport failures take the provider out of rotation for the rest of the run.
    pub fn is_hard_failure(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Looks through an `anyhow` chain for a hard provider failure.
pub fn is_hard_provider_failure(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ProviderError>())
        .any(ProviderError::is_hard_failure)
}

/// Maps a reqwest error into the provider taxonomy.
pub fn classify_http_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if let Some(status) = err.status() {
        return ProviderError::Rejected {
            provider: provider.to_string(),
            status: status.as_u16(),
        };
    }
    ProviderError::network(provider, err)
}

pub mod api;
pub mod cache;
pub mod compositor;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod init;
pub mod narration;
pub mod pipeline;
pub mod run_state;
pub mod script;
pub mod subtitle;
pub mod text;
pub mod timeline;
pub mod toolkit;
pub mod usage;
pub mod visual;

pub use error::{PipelineError, ProviderError};

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!("[{}] {}", tag, message),
        _ => tracing::info!("[{}] {}", tag, message),
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}

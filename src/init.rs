use anyhow::Result;
use std::path::Path;
use tokio::fs;

use crate::config::Config;

pub async fn ensure_directories(cfg: &Config) -> Result<()> {
    let paths = &cfg.paths;
    for dir in [
        &paths.cache_dir,
        &paths.data_dir,
        &paths.output_dir,
        &paths.music_dir,
        &paths.work_dir,
    ] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir).await?;
            tracing::info!("[INFO] Created directory: {}", dir.display());
        }
    }
    Ok(())
}

/// True when `binary -version` runs and exits cleanly.
pub async fn check_tool(binary: &str) -> bool {
    match tokio::process::Command::new(binary)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

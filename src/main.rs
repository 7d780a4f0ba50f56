use anyhow::Result;
use shorts_pipeline::config::Config;
use shorts_pipeline::init;
use shorts_pipeline::pipeline::Pipeline;
use shorts_pipeline::script::Script;

const DEFAULT_CONFIG: &str = "config.json";
const DEFAULT_SCRIPT: &str = "script.json";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::var("SHORTS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let script_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SCRIPT.to_string());

    let cfg = Config::load(&config_path).await?;
    init::ensure_directories(&cfg).await?;

    if !init::check_tool(&cfg.ffmpeg_binary).await {
        tracing::warn!("[WARN] {} not found. Please install FFmpeg.", cfg.ffmpeg_binary);
    }
    if !init::check_tool(&cfg.ffprobe_binary).await {
        tracing::warn!("[WARN] {} not found. Please install FFmpeg.", cfg.ffprobe_binary);
    }

    let script = Script::load(&script_path).await?;
    let pipeline = Pipeline::from_config(cfg)?;

    match pipeline.run(&script).await {
        Ok(report) => {
            println!("{}", report.video.display());
            Ok(())
        }
        Err(err) => {
            tracing::error!("[FAIL] {:#}", err);
            std::process::exit(1);
        }
    }
}

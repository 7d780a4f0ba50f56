use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

use crate::config::Config;
use crate::toolkit::{
    FrameSpec, Loudness, MediaToolkit, MuxJob, OverlayImage, SegmentRender, wrap_lines,
};
use crate::visual::{AssetKind, SyntheticVisual};

/// Floor reported for digital silence (`-inf dB` from volumedetect).
const SILENCE_FLOOR_DB: f64 = -91.0;

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: String,
    ffprobe: String,
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.ffmpeg_binary, &cfg.ffprobe_binary)
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            self.ffmpeg.clone(),
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ]
    }
}

async fn run_cmd(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }

    let output = cmd.output().await.context("Command execution failed")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .chars()
            .rev()
            .take(600)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return Err(anyhow::anyhow!(
            "Command failed: {} ({})",
            args.join(" "),
            tail.trim()
        ));
    }

    Ok(())
}

async fn ensure_output(out: &Path) -> Result<()> {
    match fs::metadata(out).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(anyhow::anyhow!("ffmpeg produced no output at {}", out.display())),
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn h264_args() -> Vec<String> {
    [
        "-c:v", "libx264", "-pix_fmt", "yuv420p", "-preset", "veryfast", "-crf", "22",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn mp3_args(bitrate: &str) -> Vec<String> {
    vec![
        "-c:a".to_string(),
        "libmp3lame".to_string(),
        "-b:a".to_string(),
        bitrate.to_string(),
    ]
}

/// Scale-to-cover then center crop, so any orientation fills the frame.
fn fit_filter(frame: FrameSpec) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,fps={fps},format=yuv420p",
        w = frame.width,
        h = frame.height,
        fps = frame.fps
    )
}

/// Escapes a path for use inside a filtergraph option value.
fn escape_filter_path(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn concat_line(path: &Path) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file '{}'\n", abs.display().to_string().replace('\'', "'\\''"))
}

async fn write_concat_list(inputs: &[PathBuf], list_path: &Path) -> Result<()> {
    let body: String = inputs.iter().map(|p| concat_line(p)).collect();
    fs::write(list_path, body)
        .await
        .with_context(|| format!("write concat list: {}", list_path.display()))
}

/// Offsets for chaining `xfade`: input k starts `Σd(j<k) - k·c` into the output.
pub fn xfade_offsets(durations: &[f64], crossfade: f64) -> Vec<f64> {
    let mut offsets = Vec::with_capacity(durations.len().saturating_sub(1));
    let Some(first) = durations.first() else {
        return offsets;
    };
    let mut elapsed = *first;
    for d in &durations[1..] {
        let offset = (elapsed - crossfade).max(0.0);
        offsets.push(offset);
        elapsed = offset + d;
    }
    offsets
}

fn volumedetect_regex() -> Result<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| {
        Regex::new(r"(mean|max)_volume:\s*(-?inf|-?[0-9]+(?:\.[0-9]+)?)\s*dB")
            .context("failed to compile volumedetect regex")
    })
}

pub fn parse_volumedetect(stderr: &str) -> Option<Loudness> {
    let re = volumedetect_regex().ok()?;
    let mut mean = None;
    let mut peak = None;
    for cap in re.captures_iter(stderr) {
        let value = match &cap[2] {
            v if v.ends_with("inf") => SILENCE_FLOOR_DB,
            v => v.parse::<f64>().ok()?,
        };
        match &cap[1] {
            "mean" => mean = Some(value),
            _ => peak = Some(value),
        }
    }
    Some(Loudness {
        mean_db: mean?,
        peak_db: peak?,
    })
}

pub async fn ffprobe_video_dimensions(ffprobe: &str, path: &Path) -> Result<(u32, u32)> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe execution failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let mut parts = text.split('x');
    let w = parts
        .next()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(0);
    let h = parts
        .next()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(0);

    if w == 0 || h == 0 {
        return Err(anyhow::anyhow!("Invalid dimensions"));
    }

    Ok((w, h))
}

pub async fn ffprobe_duration_seconds(ffprobe: &str, path: &Path) -> Result<f64> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.0 {
        return Err(anyhow::anyhow!("Invalid duration for {}", path.display()));
    }
    Ok(duration)
}

#[async_trait]
impl MediaToolkit for Ffmpeg {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        ffprobe_duration_seconds(&self.ffprobe, path).await
    }

    async fn probe_dimensions(&self, path: &Path) -> Result<(u32, u32)> {
        ffprobe_video_dimensions(&self.ffprobe, path).await
    }

    async fn measure_loudness(&self, path: &Path) -> Result<Loudness> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-nostats", "-i"])
            .arg(path)
            .args(["-vn", "-af", "volumedetect", "-f", "null", "-"])
            .output()
            .await
            .context("volumedetect execution failed")?;

        if !output.status.success() {
            return Err(anyhow::anyhow!("volumedetect failed for {}", path.display()));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        parse_volumedetect(&stderr)
            .ok_or_else(|| anyhow::anyhow!("volumedetect printed no levels for {}", path.display()))
    }

    async fn transcode_audio(&self, input: &Path, out: &Path) -> Result<()> {
        let mut args = self.base_args();
        args.extend(["-i".to_string(), display(input), "-vn".to_string()]);
        args.extend(mp3_args("128k"));
        args.push(display(out));
        run_cmd(&args).await?;
        ensure_output(out).await
    }

    async fn render_silence(&self, duration: f64, out: &Path) -> Result<()> {
        let mut args = self.base_args();
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            "anullsrc=r=44100:cl=mono".to_string(),
            "-t".to_string(),
            format!("{:.3}", duration),
        ]);
        args.extend(mp3_args("96k"));
        args.push(display(out));
        run_cmd(&args).await?;
        ensure_output(out).await
    }

    async fn render_cadence(&self, duration: f64, out: &Path) -> Result<()> {
        let mut args = self.base_args();
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!("sine=frequency=190:duration={:.3}", duration),
            "-af".to_string(),
            "tremolo=f=11:d=0.7,highpass=f=120,lowpass=f=2600,acompressor=threshold=-20dB:ratio=2.2:attack=5:release=70"
                .to_string(),
        ]);
        args.extend(mp3_args("128k"));
        args.push(display(out));
        run_cmd(&args).await?;
        ensure_output(out).await
    }

    async fn pad_with_silence(&self, input: &Path, target: f64, out: &Path) -> Result<()> {
        let current = self.probe_duration(input).await?;
        let mut args = self.base_args();
        args.extend([
            "-i".to_string(),
            display(input),
            "-af".to_string(),
            format!("apad=pad_dur={:.3}", (target - current).max(0.0)),
            "-t".to_string(),
            format!("{:.3}", target),
        ]);
        args.extend(mp3_args("128k"));
        args.push(display(out));
        run_cmd(&args).await?;
        ensure_output(out).await
    }

    async fn concat_audio(&self, inputs: &[PathBuf], out: &Path) -> Result<()> {
        let list_path = out.with_extension("txt");
        write_concat_list(inputs, &list_path).await?;

        let mut args = self.base_args();
        args.extend([
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            display(&list_path),
            "-af".to_string(),
            "aresample=async=1:min_hard_comp=0.100:first_pts=0".to_string(),
        ]);
        args.extend(mp3_args("128k"));
        args.push(display(out));
        let result = run_cmd(&args).await;
        let _ = fs::remove_file(&list_path).await;
        result?;
        ensure_output(out).await
    }

    async fn render_synthetic_visual(
        &self,
        visual: &SyntheticVisual,
        frame: FrameSpec,
        out: &Path,
    ) -> Result<()> {
        let vf = format!(
            "hue=h={}:s={:.2},eq=contrast=1.08:brightness={:.2},drawbox=x='mod(t*220+{},w)':y='h*0.72':w=220:h=90:color=black@0.30:t=fill",
            visual.hue, visual.saturation, visual.brightness, visual.box_offset
        );
        let mut args = self.base_args();
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!("testsrc2=size={}x{}:rate={}", frame.width, frame.height, frame.fps),
            "-t".to_string(),
            format!("{:.3}", visual.duration),
            "-vf".to_string(),
            vf,
        ]);
        args.extend(h264_args());
        args.push(display(out));
        run_cmd(&args).await?;
        ensure_output(out).await
    }

    async fn render_segment(&self, segment: &SegmentRender<'_>, out: &Path) -> Result<()> {
        let mut args = self.base_args();
        match segment.kind {
            AssetKind::Image => {
                args.extend(["-loop".to_string(), "1".to_string()]);
            }
            AssetKind::Video | AssetKind::Synthetic => {
                if segment.loops > 1 {
                    args.extend([
                        "-stream_loop".to_string(),
                        (segment.loops - 1).to_string(),
                    ]);
                }
            }
        }
        args.extend([
            "-i".to_string(),
            display(segment.source),
            "-t".to_string(),
            format!("{:.3}", segment.target),
            "-vf".to_string(),
            fit_filter(segment.frame),
            "-an".to_string(),
        ]);
        args.extend(h264_args());
        args.push(display(out));
        run_cmd(&args).await?;
        ensure_output(out).await
    }

    async fn join_segments(
        &self,
        inputs: &[PathBuf],
        durations: &[f64],
        crossfade: f64,
        out: &Path,
    ) -> Result<()> {
        if inputs.is_empty() {
            anyhow::bail!("join_segments called with no inputs");
        }

        let mut args = self.base_args();
        if inputs.len() == 1 {
            args.extend([
                "-i".to_string(),
                display(&inputs[0]),
                "-c".to_string(),
                "copy".to_string(),
                display(out),
            ]);
            run_cmd(&args).await?;
            return ensure_output(out).await;
        }

        if crossfade <= 0.0 {
            let list_path = out.with_extension("txt");
            write_concat_list(inputs, &list_path).await?;
            args.extend([
                "-f".to_string(),
                "concat".to_string(),
                "-safe".to_string(),
                "0".to_string(),
                "-i".to_string(),
                display(&list_path),
                "-an".to_string(),
            ]);
            args.extend(h264_args());
            args.push(display(out));
            let result = run_cmd(&args).await;
            let _ = fs::remove_file(&list_path).await;
            result?;
            return ensure_output(out).await;
        }

        for input in inputs {
            args.extend(["-i".to_string(), display(input)]);
        }
        let offsets = xfade_offsets(durations, crossfade);
        let mut filter = String::new();
        let mut prev = "[0:v]".to_string();
        for (k, offset) in offsets.iter().enumerate() {
            let label = format!("[x{}]", k + 1);
            filter.push_str(&format!(
                "{}[{}:v]xfade=transition=fade:duration={:.3}:offset={:.3}{};",
                prev,
                k + 1,
                crossfade,
                offset,
                label
            ));
            prev = label;
        }
        filter.pop();

        args.extend([
            "-filter_complex".to_string(),
            filter,
            "-map".to_string(),
            prev,
            "-an".to_string(),
        ]);
        args.extend(h264_args());
        args.push(display(out));
        run_cmd(&args).await?;
        ensure_output(out).await
    }

    async fn trim_video(&self, input: &Path, duration: f64, out: &Path) -> Result<()> {
        let mut args = self.base_args();
        args.extend([
            "-i".to_string(),
            display(input),
            "-t".to_string(),
            format!("{:.3}", duration),
            "-an".to_string(),
        ]);
        args.extend(h264_args());
        args.push(display(out));
        run_cmd(&args).await?;
        ensure_output(out).await
    }

    async fn freeze_tail(&self, input: &Path, extend_by: f64, out: &Path) -> Result<()> {
        let mut args = self.base_args();
        args.extend([
            "-i".to_string(),
            display(input),
            "-vf".to_string(),
            format!("tpad=stop_mode=clone:stop_duration={:.3}", extend_by),
            "-an".to_string(),
        ]);
        args.extend(h264_args());
        args.push(display(out));
        run_cmd(&args).await?;
        ensure_output(out).await
    }

    async fn render_overlay(&self, overlay: &OverlayImage<'_>, out: &Path) -> Result<()> {
        let text_path = out.with_extension("txt");
        let lines = wrap_lines(overlay.text, overlay.max_line_chars, overlay.max_lines);
        fs::write(&text_path, lines.join("\n"))
            .await
            .with_context(|| format!("write overlay text: {}", text_path.display()))?;

        let vf = format!(
            "format=rgba,drawbox=x=35:y=20:w=iw-70:h=ih-40:color=black@0.55:t=fill,drawtext=textfile='{}':fontcolor=white:fontsize={}:line_spacing=8:x=(w-text_w)/2:y=(h-text_h)/2",
            escape_filter_path(&text_path),
            overlay.font_size
        );
        let mut args = self.base_args();
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!("color=c=black@0.0:s={}x{}", overlay.width, overlay.height),
            "-frames:v".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            vf,
            "-c:v".to_string(),
            "png".to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            display(out),
        ]);
        let result = run_cmd(&args).await;
        let _ = fs::remove_file(&text_path).await;
        result?;
        ensure_output(out).await
    }

    async fn render_fallback_music(&self, duration: f64, out: &Path) -> Result<()> {
        let mut args = self.base_args();
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!("sine=frequency=140:duration={:.3}", duration),
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!("anoisesrc=color=pink:amplitude=0.02:duration={:.3}", duration),
            "-filter_complex".to_string(),
            "[0:a]volume=0.14[a0];[1:a]lowpass=f=4200,highpass=f=120,volume=0.05[a1];[a0][a1]amix=inputs=2,loudnorm=I=-20:TP=-2:LRA=9"
                .to_string(),
        ]);
        args.extend(mp3_args("128k"));
        args.push(display(out));
        run_cmd(&args).await?;
        ensure_output(out).await
    }

    async fn mux(&self, job: &MuxJob<'_>) -> Result<()> {
        let duration = format!("{:.3}", job.duration);
        let mut args = self.base_args();
        args.extend(["-i".to_string(), display(job.video)]);
        args.extend(["-i".to_string(), display(job.narration)]);
        if job.music_loops > 1 {
            args.extend([
                "-stream_loop".to_string(),
                (job.music_loops - 1).to_string(),
            ]);
        }
        args.extend(["-i".to_string(), display(job.music)]);
        for overlay in job.overlays {
            args.extend([
                "-loop".to_string(),
                "1".to_string(),
                "-t".to_string(),
                duration.clone(),
                "-i".to_string(),
                display(&overlay.image),
            ]);
        }

        let mut filter = String::from("[0:v]null[v0];");
        for (k, overlay) in job.overlays.iter().enumerate() {
            filter.push_str(&format!(
                "[v{}][{}:v]overlay=x=(W-w)/2:y={}:enable='between(t,{:.3},{:.3})'[v{}];",
                k,
                k + 3,
                overlay.y,
                overlay.start,
                overlay.end,
                k + 1
            ));
        }
        filter.push_str(&format!(
            "[1:a]volume={:.3},atrim=0:{d},asetpts=PTS-STARTPTS[voice];[2:a]volume={:.3},atrim=0:{d},asetpts=PTS-STARTPTS[music];[voice][music]amix=inputs=2:duration=first:dropout_transition=2[a]",
            job.voice_gain,
            job.music_gain,
            d = duration
        ));
        let video_label = format!("[v{}]", job.overlays.len());

        args.extend([
            "-filter_complex".to_string(),
            filter,
            "-map".to_string(),
            video_label,
            "-map".to_string(),
            "[a]".to_string(),
            "-t".to_string(),
            duration,
            "-r".to_string(),
            job.frame.fps.to_string(),
        ]);
        args.extend(h264_args());
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            display(job.out),
        ]);
        run_cmd(&args).await?;
        ensure_output(job.out).await
    }
}

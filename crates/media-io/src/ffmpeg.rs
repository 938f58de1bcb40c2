use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::{normalize_rotation, FrameExtractor, MediaError, RgbaFrame, RotationLookup, VideoRef};

const POLL: Duration = Duration::from_millis(10);

/// ffmpeg/ffprobe found on PATH.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    /// A child still running after this long is killed.
    timeout: Option<Duration>,
}

impl FfmpegTools {
    pub fn locate() -> Result<Self, MediaError> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| MediaError::ToolMissing("ffmpeg"))?;
        let ffprobe = which::which("ffprobe").map_err(|_| MediaError::ToolMissing("ffprobe"))?;
        debug!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "located media tools");
        Ok(Self { ffmpeg, ffprobe, timeout: None })
    }

    pub fn with_paths(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self { Self { ffmpeg, ffprobe, timeout: None } }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build a `VideoRef` from filesystem metadata and the container duration.
    pub fn probe(&self, path: &Path) -> Result<VideoRef, MediaError> {
        let meta = std::fs::metadata(path)?;
        let modified_ms = meta.modified().ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let locator = path.to_string_lossy().to_string();
        let json = self.run_probe(&locator, "format=duration")?;
        let duration_ms = parse_duration_ms(&json)?;
        Ok(VideoRef { id: locator.clone(), locator, size: meta.len(), duration_ms, modified_ms })
    }

    fn run_probe(&self, locator: &str, entries: &str) -> Result<String, MediaError> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(["-v", "error", "-select_streams", "v:0", "-show_entries", entries, "-of", "json", locator]);
        let out = self.run(cmd, "ffprobe")?;
        if !out.status.success() {
            return Err(MediaError::Tool { tool: "ffprobe", status: out.status.code().unwrap_or(-1), stderr: String::from_utf8_lossy(&out.stderr).trim().to_string() });
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    fn run(&self, mut cmd: Command, tool: &'static str) -> Result<Output, MediaError> {
        let Some(limit) = self.timeout else { return Ok(cmd.output()?) };
        let mut child = cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;
        // drained off-thread so a chatty child cannot block on a full pipe
        let (stdout, stderr) = (child.stdout.take(), child.stderr.take());
        let stdout = std::thread::spawn(move || drain(stdout));
        let stderr = std::thread::spawn(move || drain(stderr));
        let deadline = Instant::now() + limit;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                warn!(tool, after = ?limit, "killing media tool");
                let _ = child.kill();
                let _ = child.wait();
                return Err(MediaError::Timeout { tool, after: limit });
            }
            std::thread::sleep(POLL);
        };
        Ok(Output { status, stdout: stdout.join().unwrap_or_default(), stderr: stderr.join().unwrap_or_default() })
    }
}

fn drain(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

impl FrameExtractor for FfmpegTools {
    fn extract_frame(&self, locator: &str, position_secs: f64, dimension: u32, prefer_hardware: bool) -> Result<Option<RgbaFrame>, MediaError> {
        let d = dimension.max(1);
        let filter = format!("scale={d}:{d}:force_original_aspect_ratio=decrease,pad={d}:{d}:(ow-iw)/2:(oh-ih)/2");
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-v", "error", "-nostdin"]);
        if prefer_hardware { cmd.args(["-hwaccel", "auto"]); }
        // rotation is applied by the caller from RotationLookup
        let position = format!("{:.3}", position_secs.max(0.0));
        cmd.args(["-ss", position.as_str(), "-noautorotate", "-i", locator])
            .args(["-frames:v", "1", "-vf", filter.as_str(), "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"]);
        let out = self.run(cmd, "ffmpeg")?;
        if !out.status.success() {
            return Err(MediaError::Tool { tool: "ffmpeg", status: out.status.code().unwrap_or(-1), stderr: String::from_utf8_lossy(&out.stderr).trim().to_string() });
        }
        if out.stdout.is_empty() {
            return Ok(None);
        }
        RgbaFrame::new(d, d, out.stdout).map(Some)
    }
}

impl RotationLookup for FfmpegTools {
    fn rotation_degrees(&self, locator: &str) -> Result<u32, MediaError> {
        let json = self.run_probe(locator, "stream_tags=rotate:stream_side_data=rotation")?;
        parse_rotation(&json)
    }
}

fn parse_json(json: &str) -> Result<Value, MediaError> {
    serde_json::from_str(json).map_err(|e| MediaError::Probe(e.to_string()))
}

pub(crate) fn parse_duration_ms(json: &str) -> Result<u64, MediaError> {
    let v = parse_json(json)?;
    let secs = match &v["format"]["duration"] {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    // streams without a container duration are treated as unknown length
    Ok(secs.filter(|s| s.is_finite() && *s > 0.0).map(|s| (s * 1000.0).round() as u64).unwrap_or(0))
}

pub(crate) fn parse_rotation(json: &str) -> Result<u32, MediaError> {
    let v = parse_json(json)?;
    let Some(stream) = v["streams"].as_array().and_then(|s| s.first()) else { return Ok(0) };
    if let Some(tag) = stream["tags"]["rotate"].as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
        return Ok(normalize_rotation(tag));
    }
    let side = stream["side_data_list"].as_array().into_iter().flatten()
        .find_map(|sd| sd["rotation"].as_f64());
    // display matrix rotation is counter-clockwise
    Ok(side.map(|r| normalize_rotation(-(r.round() as i64))).unwrap_or(0))
}

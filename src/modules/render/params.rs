use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::dto::RenderOverrides;
use super::model::CANONICAL_EXT;

/// Fallback values for every knob a request may leave out.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeDefaults {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub crf: String,
    pub preset: String,
}

impl Default for EncodeDefaults {
    fn default() -> Self {
        Self {
            fps: 30.0,
            width: 1080,
            height: 1920,
            crf: "20".to_string(),
            preset: "medium".to_string(),
        }
    }
}

/// Fully resolved encoder settings. Nothing is left for ffmpeg to pick on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Encoder-native quality factor, lower is better.
    pub crf: String,
    pub preset: String,
    /// Keyframe interval in frames.
    pub gop: u32,
}

impl EncodeParams {
    pub fn build(overrides: &RenderOverrides, defaults: &EncodeDefaults) -> Self {
        let fps = overrides.fps.unwrap_or(defaults.fps);

        Self {
            fps,
            width: overrides.width.unwrap_or(defaults.width),
            height: overrides.height.unwrap_or(defaults.height),
            crf: overrides.crf.clone().unwrap_or_else(|| defaults.crf.clone()),
            preset: overrides
                .preset
                .clone()
                .unwrap_or_else(|| defaults.preset.clone()),
            gop: overrides.gop.unwrap_or_else(|| default_gop(fps)),
        }
    }

    /// Fit inside `width`x`height` keeping the aspect ratio. No padding, no cropping.
    pub fn scale_filter(&self) -> String {
        format!(
            "scale={}:{}:force_original_aspect_ratio=decrease,format=yuv420p",
            self.width, self.height
        )
    }

    /// Argument vector for the sequence-to-video encode.
    pub fn encode_args(&self, input_pattern: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-r".into(), self.fps.to_string().into()];
        args.push("-i".into());
        args.push(input_pattern.as_os_str().to_owned());

        let video = [
            "-vf".to_string(),
            self.scale_filter(),
            "-c:v".into(),
            "libx264".into(),
            "-profile:v".into(),
            "high".into(),
            "-preset".into(),
            self.preset.clone(),
            "-crf".into(),
            self.crf.clone(),
            "-g".into(),
            self.gop.to_string(),
        ];
        args.extend(video.into_iter().map(OsString::from));

        // Fixed output policy: 8-bit 4:2:0, BT.709 limited range, moov atom up front.
        let policy = [
            "-pix_fmt",
            "yuv420p",
            "-colorspace",
            "bt709",
            "-color_primaries",
            "bt709",
            "-color_trc",
            "bt709",
            "-color_range",
            "tv",
            "-movflags",
            "+faststart",
        ];
        args.extend(policy.into_iter().map(OsString::from));

        args.push(output.as_os_str().to_owned());
        args
    }
}

/// Twice the frame rate, i.e. a keyframe every two seconds. Never below one frame.
pub fn default_gop(fps: f64) -> u32 {
    ((fps * 2.0).round() as u32).max(1)
}

/// printf-style pattern ffmpeg expands to `frame_0001.png`, `frame_0002.png`, ...
pub fn input_pattern(frames_dir: &Path) -> PathBuf {
    frames_dir.join(format!("frame_%04d.{}", CANONICAL_EXT))
}

/// Single image re-encode; the output format follows the target extension.
pub fn convert_args(source: &Path, target: &Path) -> Vec<OsString> {
    vec![
        OsString::from("-y"),
        OsString::from("-i"),
        source.as_os_str().to_owned(),
        target.as_os_str().to_owned(),
    ]
}

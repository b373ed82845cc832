use std::str::FromStr;

use bytes::Bytes;
use serde::Serialize;
use utoipa::ToSchema;
use validator::Validate;

use super::error::{RenderError, RenderResult};

pub const ARCHIVE_FIELD: &str = "frames";

const X264_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
    "placebo",
];

/// Typed knobs from a render request. `None` means "use the default".
#[derive(Debug, Clone, Default, PartialEq, Validate)]
pub struct RenderOverrides {
    #[validate(range(exclusive_min = 0.0, max = 240.0))]
    pub fps: Option<f64>,
    #[validate(range(min = 2, max = 8192))]
    pub width: Option<u32>,
    #[validate(range(min = 2, max = 8192))]
    pub height: Option<u32>,
    pub crf: Option<String>,
    pub preset: Option<String>,
    #[validate(range(min = 1))]
    pub gop: Option<u32>,
}

impl RenderOverrides {
    /// Bounds on top of the type-level parsing. The parameter builder trusts these.
    pub fn check(&self) -> RenderResult<()> {
        self.validate()
            .map_err(|e| RenderError::validation(e.to_string()))?;

        if let Some(crf) = &self.crf {
            let in_range = crf
                .parse::<f64>()
                .map(|v| (0.0..=63.0).contains(&v))
                .unwrap_or(false);
            if !in_range {
                return Err(RenderError::validation("crf must be a number between 0 and 63"));
            }
        }

        if let Some(preset) = &self.preset {
            if !X264_PRESETS.contains(&preset.as_str()) {
                return Err(RenderError::validation(format!(
                    "preset must be one of: {}",
                    X264_PRESETS.join(", ")
                )));
            }
        }

        Ok(())
    }
}

/// Raw multipart fields as they arrive, before any interpretation.
#[derive(Debug, Default)]
pub struct RenderForm {
    pub archive: Option<Bytes>,
    pub fps: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub crf: Option<String>,
    pub preset: Option<String>,
    pub gop: Option<String>,
}

impl RenderForm {
    /// Stores a text field. Unknown names are ignored.
    pub fn set_text(&mut self, name: &str, value: String) {
        let slot = match name {
            "fps" => &mut self.fps,
            "width" => &mut self.width,
            "height" => &mut self.height,
            "crf" => &mut self.crf,
            "preset" => &mut self.preset,
            "gop" => &mut self.gop,
            _ => return,
        };
        *slot = Some(value);
    }

    pub fn into_parts(self) -> RenderResult<(Bytes, RenderOverrides)> {
        let archive = match self.archive {
            Some(archive) if !archive.is_empty() => archive,
            Some(_) => return Err(RenderError::validation("frames archive is empty")),
            None => return Err(RenderError::validation("missing frames archive")),
        };

        let overrides = RenderOverrides {
            fps: parse_number("fps", self.fps)?,
            width: parse_number("width", self.width)?,
            height: parse_number("height", self.height)?,
            crf: non_empty(self.crf),
            preset: non_empty(self.preset),
            gop: parse_number("gop", self.gop)?,
        };
        overrides.check()?;

        Ok((archive, overrides))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: FromStr>(name: &str, value: Option<String>) -> RenderResult<Option<T>> {
    match non_empty(value) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| RenderError::validation(format!("{} must be a number, got '{}'", name, raw))),
    }
}

/// Multipart layout of `POST /render`, for the OpenAPI document only.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct RenderUpload {
    /// ZIP archive of PNG/JPEG frames, ordered by file name.
    #[schema(value_type = String, format = Binary)]
    pub frames: Vec<u8>,
    #[schema(example = 30)]
    pub fps: Option<f64>,
    #[schema(example = 1080)]
    pub width: Option<u32>,
    #[schema(example = 1920)]
    pub height: Option<u32>,
    #[schema(example = "20")]
    pub crf: Option<String>,
    #[schema(example = "medium")]
    pub preset: Option<String>,
    /// Keyframe interval; defaults to twice the frame rate.
    pub gop: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub ok: bool,
}

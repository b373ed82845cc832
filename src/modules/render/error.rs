use std::path::Path;
use std::time::Duration;

use axum::http::StatusCode;

use crate::infrastructure::encoder::ffmpeg::EncoderError;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("{0}")]
    RequestValidation(String),

    #[error("archive could not be extracted: {0}")]
    Extraction(String),

    #[error("no valid image found in the archive")]
    NoValidFrames,

    #[error("frame normalization failed: {0}")]
    Normalization(String),

    #[error("encoder exited with status {}", status_text(.code))]
    Encode {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("encoder did not finish within {}s", .0.as_secs())]
    EncodeTimeout(Duration),

    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

fn status_text(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl RenderError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::RequestValidation(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn normalization(msg: impl Into<String>) -> Self {
        Self::Normalization(msg.into())
    }

    /// Caller-correctable failures map to 4xx, environment and encoder trouble to 5xx.
    pub fn status(&self) -> StatusCode {
        match self {
            RenderError::RequestValidation(_)
            | RenderError::Extraction(_)
            | RenderError::NoValidFrames => StatusCode::BAD_REQUEST,
            RenderError::Normalization(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RenderError::Encode { .. } | RenderError::Workspace(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RenderError::EncoderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RenderError::EncodeTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RenderError::RequestValidation(_) => "invalid_request",
            RenderError::Extraction(_) => "extraction_failed",
            RenderError::NoValidFrames => "no_valid_frames",
            RenderError::Normalization(_) => "normalization_failed",
            RenderError::Encode { .. } => "encode_failed",
            RenderError::EncoderUnavailable(_) => "encoder_unavailable",
            RenderError::EncodeTimeout(_) => "encode_timeout",
            RenderError::Workspace(_) => "workspace_error",
        }
    }

    /// Client-facing detail. For encoder failures this is the full stderr.
    pub fn detail(&self) -> Option<String> {
        match self {
            RenderError::NoValidFrames => None,
            RenderError::Encode { diagnostics, .. } => {
                let mut detail = self.to_string();
                if !diagnostics.is_empty() {
                    detail.push('\n');
                    detail.push_str(diagnostics);
                }
                Some(detail)
            }
            other => Some(other.to_string()),
        }
    }

    /// Replaces the job's workspace path in any message text so responses
    /// never reveal where jobs live on disk.
    pub fn scrub(self, workspace: &Path) -> Self {
        let needle = workspace.display().to_string();
        if needle.is_empty() {
            return self;
        }
        let clean = |text: String| text.replace(&needle, "<workspace>");

        match self {
            RenderError::Extraction(m) => RenderError::Extraction(clean(m)),
            RenderError::Normalization(m) => RenderError::Normalization(clean(m)),
            RenderError::EncoderUnavailable(m) => RenderError::EncoderUnavailable(clean(m)),
            RenderError::Encode { code, diagnostics } => RenderError::Encode {
                code,
                diagnostics: clean(diagnostics),
            },
            other => other,
        }
    }
}

impl From<EncoderError> for RenderError {
    fn from(e: EncoderError) -> Self {
        match e {
            // The configured binary path stays in the logs, not in the response.
            EncoderError::Unavailable { source, .. } => {
                RenderError::EncoderUnavailable(source.to_string())
            }
            EncoderError::Failed { code, diagnostics } => RenderError::Encode { code, diagnostics },
            EncoderError::TimedOut { after } => RenderError::EncodeTimeout(after),
            EncoderError::Io(io) => RenderError::Workspace(io),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_mistakes_are_4xx_and_encoder_trouble_is_5xx() {
        assert_eq!(RenderError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(RenderError::extraction("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(RenderError::NoValidFrames.status(), StatusCode::BAD_REQUEST);
        assert!(RenderError::normalization("x").status().is_client_error());

        let encode = RenderError::Encode { code: Some(1), diagnostics: String::new() };
        assert!(encode.status().is_server_error());
        assert!(RenderError::EncoderUnavailable("x".into()).status().is_server_error());
        assert!(RenderError::EncodeTimeout(Duration::from_secs(1)).status().is_server_error());
    }

    #[test]
    fn encode_detail_carries_full_diagnostics() {
        let diagnostics = "line\n".repeat(5000);
        let err = RenderError::Encode { code: Some(1), diagnostics: diagnostics.clone() };

        let detail = err.detail().unwrap();
        assert!(detail.starts_with("encoder exited with status 1\n"));
        assert!(detail.ends_with(&diagnostics));
    }

    #[test]
    fn scrub_hides_workspace_paths() {
        let ws = Path::new("/tmp/frame_render_1234");
        let err = RenderError::Encode {
            code: Some(1),
            diagnostics: "/tmp/frame_render_1234/frames/frame_%04d.png: No such file".into(),
        }
        .scrub(ws);

        let detail = err.detail().unwrap();
        assert!(!detail.contains("/tmp/frame_render_1234"));
        assert!(detail.contains("<workspace>/frames/frame_%04d.png"));
    }

    #[test]
    fn unavailable_encoder_maps_to_its_own_variant() {
        let e = EncoderError::Unavailable {
            program: "ffmpeg".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let err = RenderError::from(e);
        assert_eq!(err.label(), "encoder_unavailable");
    }
}

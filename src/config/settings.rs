use std::path::PathBuf;
use std::time::Duration;

use crate::config::env::{self, EnvKey};
use crate::modules::render::model::FrameOrder;

/// 512 MiB, the transport-level cap on one upload.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;
/// 4 GiB of decompressed frames per job.
pub const DEFAULT_MAX_EXTRACTED_BYTES: u64 = 4 * 1024 * 1024 * 1024;
pub const DEFAULT_ENCODE_TIMEOUT_SECS: u64 = 600;

/// Process-wide settings, resolved once at startup and read-only afterwards.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub ffmpeg_bin: PathBuf,
    pub work_root: PathBuf,
    pub workspace_prefix: String,
    pub max_upload_bytes: usize,
    /// Ceiling on what one archive may expand to on disk.
    pub max_extracted_bytes: u64,
    /// `None` disables the per-invocation encoder deadline.
    pub encode_timeout: Option<Duration>,
    pub frame_order: FrameOrder,
}

impl AppConfig {
    pub fn new() -> Self {
        let timeout_secs = env::get_parsed(EnvKey::EncodeTimeoutSecs, DEFAULT_ENCODE_TIMEOUT_SECS);

        Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 8787),
            ffmpeg_bin: PathBuf::from(env::get_or(EnvKey::FfmpegBin, "ffmpeg")),
            work_root: env::get(EnvKey::TmpDir)
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
            workspace_prefix: env::get_or(EnvKey::WorkspacePrefix, "frame_render"),
            max_upload_bytes: env::get_parsed(EnvKey::MaxUploadBytes, DEFAULT_MAX_UPLOAD_BYTES),
            max_extracted_bytes: env::get_parsed(EnvKey::MaxExtractedBytes, DEFAULT_MAX_EXTRACTED_BYTES),
            encode_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            frame_order: env::get_parsed(EnvKey::FrameOrder, FrameOrder::Lexical),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: 8787,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            work_root: std::env::temp_dir(),
            workspace_prefix: "frame_render".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_extracted_bytes: DEFAULT_MAX_EXTRACTED_BYTES,
            encode_timeout: Some(Duration::from_secs(DEFAULT_ENCODE_TIMEOUT_SECS)),
            frame_order: FrameOrder::Lexical,
        }
    }
}

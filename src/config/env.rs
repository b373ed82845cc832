use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    FfmpegBin,
    TmpDir,
    WorkspacePrefix,
    MaxUploadBytes,
    MaxExtractedBytes,
    EncodeTimeoutSecs,
    FrameOrder,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "PORT",
            EnvKey::FfmpegBin => "FFMPEG_BIN",
            EnvKey::TmpDir => "RENDER_TMP_DIR",
            EnvKey::WorkspacePrefix => "RENDER_WORKSPACE_PREFIX",
            EnvKey::MaxUploadBytes => "MAX_UPLOAD_BYTES",
            EnvKey::MaxExtractedBytes => "MAX_EXTRACTED_BYTES",
            EnvKey::EncodeTimeoutSecs => "ENCODE_TIMEOUT_SECS",
            EnvKey::FrameOrder => "FRAME_ORDER",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

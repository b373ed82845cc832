use crate::config::settings::AppConfig;
use crate::infrastructure::encoder::ffmpeg::Encoder;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub encoder: Encoder,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let encoder = Encoder::new(config.ffmpeg_bin.clone(), config.encode_timeout);
        Self { config, encoder }
    }
}

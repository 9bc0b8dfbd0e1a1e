//! Layered configuration: `config.toml` defaults, overridden by `APP__`-prefixed
//! environment variables, mirroring `original_source/app/shared/config.py`'s
//! `Settings` field set one-for-one.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Settings {
    pub app_name: String,
    pub debug: bool,

    pub database_url: String,

    pub storage_type: String,
    pub upload_dir: String,

    pub plate_detection_model: String,

    pub recognition: RecognitionSettings,

    pub worker_pool_size: usize,
    pub server_host: String,
    pub server_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecognitionSettings {
    pub use_plate_detection: bool,
    pub plate_detection_confidence: f32,
    pub ocr_languages: Vec<String>,
    pub ocr_min_confidence: f32,
    pub ocr_gpu: bool,
    pub needs_review_threshold: f32,
    pub auto_accept_threshold: f32,
    pub enable_enhanced_retry: bool,
    pub max_processing_attempts: u32,
    pub default_plate_region: String,
    pub detection_padding: u32,
}

impl Settings {
    /// Loads `config.toml` from the working directory, then applies any
    /// `APP__SECTION__FIELD`-shaped environment overrides (e.g.
    /// `APP__RECOGNITION__NEEDS_REVIEW_THRESHOLD=0.5`).
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn into_recognition_config(&self) -> recognition_core::RecognitionConfig {
        recognition_core::RecognitionConfig {
            use_plate_detection: self.recognition.use_plate_detection,
            plate_detection_model: self.plate_detection_model.clone(),
            detection_confidence: self.recognition.plate_detection_confidence,
            detection_padding: self.recognition.detection_padding,
            ocr_languages: self.recognition.ocr_languages.clone(),
            ocr_gpu: self.recognition.ocr_gpu,
            min_ocr_confidence: self.recognition.ocr_min_confidence,
            default_region: self.recognition.default_plate_region.clone(),
            needs_review_threshold: self.recognition.needs_review_threshold,
            auto_accept_threshold: self.recognition.auto_accept_threshold,
            enable_enhanced_retry: self.recognition.enable_enhanced_retry,
            max_processing_attempts: self.recognition.max_processing_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_recognition_config_carries_thresholds_through() {
        let settings = Settings {
            app_name: "test".into(),
            debug: false,
            database_url: "sqlite://test.db".into(),
            storage_type: "local".into(),
            upload_dir: "uploads".into(),
            plate_detection_model: "models/plate_detector.onnx".into(),
            recognition: RecognitionSettings {
                use_plate_detection: true,
                plate_detection_confidence: 0.5,
                ocr_languages: vec!["eng".into(), "por".into()],
                ocr_min_confidence: 0.3,
                ocr_gpu: false,
                needs_review_threshold: 0.6,
                auto_accept_threshold: 0.85,
                enable_enhanced_retry: true,
                max_processing_attempts: 3,
                default_plate_region: "BR".into(),
                detection_padding: 10,
            },
            worker_pool_size: 2,
            server_host: "0.0.0.0".into(),
            server_port: 8080,
        };

        let recognition_config = settings.into_recognition_config();
        assert_eq!(recognition_config.needs_review_threshold, 0.6);
        assert_eq!(recognition_config.ocr_languages, vec!["eng", "por"]);
        assert_eq!(recognition_config.default_region, "BR");
    }
}

//! Runtime configuration for the cache service.

use ::config::{Config, File};
use serde::Deserialize;
use std::convert::TryFrom;
use std::error::Error;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Directory holding the `.rec` record files.
    pub data_dir: String,
    /// Vector dimension of the cached embeddings.
    pub dims: usize,
    /// Similarity mode name, "L2NORM" or "COSINE".
    pub mode: String,
    pub log_level: String,
}

impl TryFrom<Config> for AppConfig {
    type Error = Box<dyn Error>;

    fn try_from(config: Config) -> Result<Self, Self::Error> {
        Ok(Self {
            data_dir: config.get::<String>("data_dir")?,
            dims: config.get::<usize>("dims")?,
            mode: config.get::<String>("mode")?,
            log_level: config.get::<String>("log_level")?,
        })
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self {
            data_dir: std::env::var("DATA_DIR").expect("DATA_DIR must be set"),
            dims: std::env::var("DIMS")
                .expect("DIMS must be set")
                .parse()
                .expect("DIMS must be a number"),
            mode: std::env::var("MODE").expect("MODE must be set"),
            log_level: std::env::var("LOG_LEVEL").expect("LOG_LEVEL must be set"),
        }
    }

    #[allow(deprecated)]
    pub fn from_file() -> Self {
        let mut settings = Config::default();
        settings.merge(File::with_name("config")).unwrap();
        settings.try_into().unwrap()
    }

    pub fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            dims: 1536,
            mode: "COSINE".to_string(),
            log_level: "info".to_string(),
        }
    }
}

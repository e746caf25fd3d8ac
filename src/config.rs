use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = option_env!("FINDPICS_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    match ProjectDirs::from("", "", "findpics") {
        Some(dirs) => dirs.config_dir().join("config.toml"),
        None => PathBuf::from("findpics.toml"),
    }
});

fn default_models_dir() -> PathBuf {
    match ProjectDirs::from("", "", "findpics") {
        Some(dirs) => dirs.data_dir().join("models"),
        None => PathBuf::from("models"),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cosine similarity at or above which a face counts as the person of interest.
    pub threshold: f32,
    /// Detection score cutoff.
    pub score_threshold: f32,
    /// IoU cutoff for non-maximum suppression.
    pub nms_threshold: f32,
    /// Worker threads for the batch run; 0 means one per core.
    pub jobs: usize,
    /// Candidate images larger than this on either side are downsized
    /// before inference; 0 disables downsizing.
    pub max_dimension: u32,
    /// Directory holding the ONNX model files.
    pub models_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            jobs: 0,
            max_dimension: 1600,
            models_dir: default_models_dir(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_in_defaults() {
        let cfg: Config = toml::from_str("threshold = 0.75").unwrap();
        assert_eq!(cfg.threshold, 0.75);
        assert_eq!(cfg.nms_threshold, Config::default().nms_threshold);
        assert_eq!(cfg.max_dimension, 1600);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = Config::default();
        let raw = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&raw).unwrap();
        assert_eq!(back.threshold, cfg.threshold);
        assert_eq!(back.models_dir, cfg.models_dir);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let cfg = load_config(Some(Path::new("/nonexistent/findpics.toml"))).unwrap();
        assert_eq!(cfg.jobs, 0);
    }
}

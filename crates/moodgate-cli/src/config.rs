use std::path::{Path, PathBuf};

use moodgate_core::TrackerConfig;
use serde::Serialize;
use thiserror::Error;

/// Frames between two processed frames when `MOODGATE_FRAME_STRIDE` is unset.
pub const DEFAULT_FRAME_STRIDE: usize = 5;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read tracker config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tracker config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Root for everything moodgate writes (default: $XDG_DATA_HOME/moodgate).
    pub data_dir: PathBuf,
    /// JSON array of validation records.
    pub records_path: PathBuf,
    /// Directory receiving one JPEG per validated face.
    pub image_dir: PathBuf,
    /// Only every Nth frame reaches the tracker.
    pub frame_stride: usize,
    pub tracker: TrackerConfig,
}

impl Config {
    /// Load configuration from `MOODGATE_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = var("MOODGATE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| {
                        let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("moodgate")
            });

        let records_path = var("MOODGATE_RECORDS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("validated_faces.json"));
        let image_dir = var("MOODGATE_IMAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("faces"));

        let mut tracker = match var("MOODGATE_TRACKER_CONFIG") {
            Some(path) => load_tracker_config(Path::new(&path))?,
            None => TrackerConfig::default(),
        };
        tracker.tolerance = parse_or(var("MOODGATE_TOLERANCE"), tracker.tolerance);

        Ok(Self {
            data_dir,
            records_path,
            image_dir,
            frame_stride: parse_or(var("MOODGATE_FRAME_STRIDE"), DEFAULT_FRAME_STRIDE).max(1),
            tracker,
        })
    }
}

fn load_tracker_config(path: &Path) -> Result<TrackerConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str(&raw).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "tracker config loaded");
    Ok(config)
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_under_home() {
        let config = load(&[("HOME", "/home/alice")]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/home/alice/.local/share/moodgate"));
        assert_eq!(
            config.records_path,
            PathBuf::from("/home/alice/.local/share/moodgate/validated_faces.json")
        );
        assert_eq!(config.image_dir, PathBuf::from("/home/alice/.local/share/moodgate/faces"));
        assert_eq!(config.frame_stride, DEFAULT_FRAME_STRIDE);
        assert_eq!(config.tracker, TrackerConfig::default());
    }

    #[test]
    fn test_explicit_paths_win() {
        let config = load(&[
            ("XDG_DATA_HOME", "/xdg"),
            ("MOODGATE_RECORDS_PATH", "/srv/records.json"),
            ("MOODGATE_IMAGE_DIR", "/srv/img"),
        ])
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/xdg/moodgate"));
        assert_eq!(config.records_path, PathBuf::from("/srv/records.json"));
        assert_eq!(config.image_dir, PathBuf::from("/srv/img"));
    }

    #[test]
    fn test_numeric_overrides_and_fallbacks() {
        let config = load(&[
            ("MOODGATE_DATA_DIR", "/d"),
            ("MOODGATE_FRAME_STRIDE", "2"),
            ("MOODGATE_TOLERANCE", "0.35"),
        ])
        .unwrap();
        assert_eq!(config.frame_stride, 2);
        assert!((config.tracker.tolerance - 0.35).abs() < f32::EPSILON);

        let config = load(&[("MOODGATE_DATA_DIR", "/d"), ("MOODGATE_FRAME_STRIDE", "often")]).unwrap();
        assert_eq!(config.frame_stride, DEFAULT_FRAME_STRIDE);

        let config = load(&[("MOODGATE_DATA_DIR", "/d"), ("MOODGATE_FRAME_STRIDE", "0")]).unwrap();
        assert_eq!(config.frame_stride, 1);
    }

    #[test]
    fn test_tracker_config_file() {
        let dir = std::env::temp_dir().join(format!(
            "moodgate-config-test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tracker.toml");
        std::fs::write(
            &path,
            "absence_counter_threshold = 30\ntolerance = 0.1\n\n[emotion]\nvalidation = 12\n",
        )
        .unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let config = load(&[("MOODGATE_DATA_DIR", "/d"), ("MOODGATE_TRACKER_CONFIG", &path_str)]).unwrap();
        assert_eq!(config.tracker.absence_counter_threshold, 30);
        assert_eq!(config.tracker.emotion.validation, 12);
        assert_eq!(config.tracker.emotion.change, 10);
        assert!((config.tracker.tolerance - 0.1).abs() < f32::EPSILON);

        // The environment overrides the file.
        let config = load(&[
            ("MOODGATE_DATA_DIR", "/d"),
            ("MOODGATE_TRACKER_CONFIG", &path_str),
            ("MOODGATE_TOLERANCE", "0.25"),
        ])
        .unwrap();
        assert!((config.tracker.tolerance - 0.25).abs() < f32::EPSILON);

        std::fs::write(&path, "absence_counter_threshold = \"many\"\n").unwrap();
        let err = load(&[("MOODGATE_DATA_DIR", "/d"), ("MOODGATE_TRACKER_CONFIG", &path_str)]).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_tracker_config_is_an_error() {
        let err = load(&[
            ("MOODGATE_DATA_DIR", "/d"),
            ("MOODGATE_TRACKER_CONFIG", "/nonexistent/moodgate/tracker.toml"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

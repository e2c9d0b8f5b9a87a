use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vulkan::{AllocatorSettings, VulkanSettings};

/// The settings file used when no `--settings` argument is given.
pub const SETTINGS_FILE: &str = "thermesh.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub vulkan: VulkanSettings,
    pub allocator: AllocatorSettings,
    pub logging: LoggingSettings,
    pub demo: DemoSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Maximum level to log, one of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub level: String,

    /// Directory the daily log files are written to.
    pub directory: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            directory: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Upload worker threads, each owns a command pool.
    pub worker_threads: usize,

    pub heat_sources: usize,

    /// Width and height of the heat map texture.
    pub texture_size: u32,

    /// Subdivision levels applied to the base mesh.
    pub subdivisions: u32,

    pub seed: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            heat_sources: 8,
            texture_size: 256,
            subdivisions: 4,
            seed: 0x7e57,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to open settings file:\n{0}")]
    OpenFile(#[source] io::Error),

    #[error("Failed to save settings file:\n{0}")]
    SaveFile(#[from] SaveError),

    #[error("Failed to read settings file:\n{0}")]
    ReadFile(#[source] io::Error),

    #[error("Failed to deserialize settings:\n{0}")]
    Deserialize(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Failed to serialize settings:\n{0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write file:\n{0}")]
    Write(#[from] io::Error),
}

impl Settings {
    /// Loads the settings at `path`, writing the defaults there first if the file does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, LoadError> {
        let file = fs::File::open(path);

        if file
            .as_ref()
            .is_err_and(|e| e.kind() == io::ErrorKind::NotFound)
        {
            let settings = Self::default();
            settings.save(path)?;

            return Ok(settings);
        }

        let mut file = file.map_err(LoadError::OpenFile)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(LoadError::ReadFile)?;

        let settings: Self = toml::from_str(&contents)?;

        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), SaveError> {
        let toml_string = toml::to_string_pretty(self)?;

        fs::write(path, toml_string.as_bytes())?;
        Ok(())
    }

    /// The settings path from `--settings <path>`, otherwise [`SETTINGS_FILE`] next to the
    /// executable.
    pub fn path_from_args() -> PathBuf {
        let mut args = std::env::args().skip_while(|arg| arg != "--settings");

        if let Some(path) = args.nth(1) {
            return PathBuf::from(path);
        }

        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_default()
            .join(SETTINGS_FILE)
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::{LoadError, Settings};

    #[test]
    fn missing_file_is_created_with_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("thermesh.toml");

        let settings = Settings::load_or_create(&path).unwrap();

        assert_eq!(settings, Settings::default());
        assert!(path.exists());
        assert_eq!(Settings::load_or_create(&path).unwrap(), settings);
    }

    #[test]
    fn saved_settings_round_trip() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("thermesh.toml");

        let mut settings = Settings::default();
        settings.vulkan.debug = true;
        settings.allocator.default_pool_size = 64 * 1024 * 1024;
        settings.allocator.safety_padding = vulkan::LEGACY_SAFETY_PADDING;
        settings.logging.level = "trace".to_string();
        settings.demo.worker_threads = 2;
        settings.save(&path).unwrap();

        assert_eq!(Settings::load_or_create(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("thermesh.toml");
        fs::write(&path, "[allocator]\nsafety_padding = 2048\n").unwrap();

        let settings = Settings::load_or_create(&path).unwrap();

        assert_eq!(settings.allocator.safety_padding, 2048);
        assert_eq!(
            settings.allocator.default_pool_size,
            vulkan::DEFAULT_POOL_SIZE
        );
        assert_eq!(settings.demo, Settings::default().demo);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("thermesh.toml");
        fs::write(&path, "[allocator\n").unwrap();

        assert!(matches!(
            Settings::load_or_create(&path),
            Err(LoadError::Deserialize(_))
        ));
    }
}

//! Configuración del pipeline desde TOML.
//!
//! Orden de resolución:
//! 1. Ruta explícita
//! 2. Variable `MCEREBRO_CONFIG_PATH`
//! 3. `./mcerebro.toml`
//!
//! Después se aplican las variables de entorno `MCEREBRO_LOG_LEVEL` y
//! `MCEREBRO_MODEL_PATH` y se valida el resultado.

use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::layout::LayoutKind;
use crate::types::{
    Channel, DEFAULT_CHANNEL_CAPACITY, DEFAULT_FRAME_QUEUE_CAPACITY, DEFAULT_N_SAMPLES,
    DEFAULT_OUTPUT_SIZE,
};

pub const CONFIG_ENV: &str = "MCEREBRO_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "mcerebro.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Muestras por canal en cada ventana (N_SAMPLES)
    pub n_samples: usize,
    /// Máximo de muestras retenidas por canal
    pub channel_capacity: usize,
    /// Pushes sin datos tras los que un canal se considera parado
    pub stale_after: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            n_samples: DEFAULT_N_SAMPLES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            stale_after: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub labels: Option<PathBuf>,
    /// Si faltan se usan los del propio modelo
    pub input_name: Option<String>,
    pub output_name: Option<String>,
    pub output_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("model.onnx"),
            labels: None,
            input_name: None,
            output_name: None,
            output_size: DEFAULT_OUTPUT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub frame_queue_capacity: usize,
    pub window_queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: DEFAULT_FRAME_QUEUE_CAPACITY,
            window_queue_capacity: 4,
        }
    }
}

/// Un dispositivo físico (una característica BLE)
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub layout: LayoutKind,
    /// MAC BLE, sólo para la fuente BlueZ
    #[serde(default)]
    pub address: Option<String>,
    /// Ruta relativa de la característica GATT bajo el dispositivo
    #[serde(default = "default_characteristic")]
    pub characteristic: String,
}

fn default_characteristic() -> String {
    "service0001/char0002".to_string()
}

/// Un canal de la ventana: qué señal de qué dispositivo
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub device: String,
    pub signal: Channel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    /// Orden declarado de los canales en la ventana
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.window.n_samples == 0 {
            errors.push("window.n_samples must be > 0".to_string());
        }
        if self.window.channel_capacity < self.window.n_samples {
            errors.push(format!(
                "window.channel_capacity ({}) must be >= window.n_samples ({})",
                self.window.channel_capacity, self.window.n_samples
            ));
        }
        if self.model.output_size == 0 {
            errors.push("model.output_size must be > 0".to_string());
        }
        if self.stream.frame_queue_capacity == 0 {
            errors.push("stream.frame_queue_capacity must be > 0".to_string());
        }
        if self.stream.window_queue_capacity == 0 {
            errors.push("stream.window_queue_capacity must be > 0".to_string());
        }
        if self.channels.is_empty() {
            errors.push("at least one [[channels]] entry is required".to_string());
        }

        let mut device_names = HashSet::new();
        for device in &self.devices {
            if !device_names.insert(device.name.as_str()) {
                errors.push(format!("duplicate device name: {}", device.name));
            }
        }

        let mut channel_names = HashSet::new();
        for channel in &self.channels {
            if !channel_names.insert(channel.name.as_str()) {
                errors.push(format!("duplicate channel name: {}", channel.name));
            }
            if !device_names.contains(channel.device.as_str()) {
                errors.push(format!(
                    "channel {} references unknown device {}",
                    channel.name, channel.device
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(errors.join("; ")))
        }
    }
}

/// Busca el fichero de configuración
pub fn find_config_file(explicit: Option<&Path>) -> ConfigResult<PathBuf> {
    if let Some(path) = explicit {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(ConfigError::FileNotFound(path.display().to_string()))
        };
    }

    if let Ok(env_path) = env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        return if path.exists() {
            Ok(path)
        } else {
            Err(ConfigError::FileNotFound(format!(
                "{} (from {})",
                path.display(),
                CONFIG_ENV
            )))
        };
    }

    let path = PathBuf::from(DEFAULT_CONFIG_FILE);
    if path.exists() {
        Ok(path)
    } else {
        Err(ConfigError::FileNotFound(format!(
            "{} (set {} to use another location)",
            DEFAULT_CONFIG_FILE, CONFIG_ENV
        )))
    }
}

/// Aplica las sobreescrituras por variables de entorno
pub fn apply_environment_overrides(config: &mut PipelineConfig) {
    if let Ok(value) = env::var("MCEREBRO_LOG_LEVEL") {
        config.log_level = value;
    }
    if let Ok(value) = env::var("MCEREBRO_MODEL_PATH") {
        config.model.path = PathBuf::from(value);
    }
}

/// Carga, sobreescribe y valida la configuración
pub fn load_config(path: Option<&Path>) -> ConfigResult<PipelineConfig> {
    let config_file = find_config_file(path)?;
    let content = fs::read_to_string(&config_file)?;

    let mut config: PipelineConfig = toml::from_str(&content)?;
    apply_environment_overrides(&mut config);
    config.validate()?;

    Ok(config)
}

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure that can be loaded from CLI or a config file
///
/// Example configuration file content
/// # Video Merge Configuration
///
/// # Server configuration
/// listen_on_port = 32145
/// bind_address = "127.0.0.1"
///
/// # External tools
/// ffmpeg_path = "/usr/local/bin/ffmpeg"
/// ffprobe_path = "/usr/local/bin/ffprobe"
/// threads = 0                      # 0 = detect from CPU count
///
/// # Limits
/// max_upload_bytes = 2147483648
/// session_ttl_secs = 3600
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, default_value_t = 32145)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Address to bind the HTTP listener to
    #[arg(short, long, default_value = "0.0.0.0")]
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// ffmpeg executable name or path
    #[arg(long, default_value = "ffmpeg")]
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// ffprobe executable name or path
    #[arg(long, default_value = "ffprobe")]
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,

    /// Encoder threads passed to ffmpeg (0 = detect)
    #[arg(short, long, default_value_t = 0)]
    #[serde(default)]
    pub threads: usize,

    /// Largest accepted upload in bytes
    #[arg(short, long, default_value_t = 2 * 1024 * 1024 * 1024)]
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Idle seconds before a session and its videos are dropped
    #[arg(short, long, default_value_t = 3600)]
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Configuration file path (fills in values not given on the command line)
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            bind_address: default_bind_address(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            threads: 0,
            max_upload_bytes: default_max_upload_bytes(),
            session_ttl_secs: default_session_ttl_secs(),
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.bind_address == default_bind_address() {
            self.bind_address = file_config.bind_address;
        }
        if self.ffmpeg_path == default_ffmpeg_path() {
            self.ffmpeg_path = file_config.ffmpeg_path;
        }
        if self.ffprobe_path == default_ffprobe_path() {
            self.ffprobe_path = file_config.ffprobe_path;
        }
        if self.threads == 0 {
            self.threads = file_config.threads;
        }
        if self.max_upload_bytes == default_max_upload_bytes() {
            self.max_upload_bytes = file_config.max_upload_bytes;
        }
        if self.session_ttl_secs == default_session_ttl_secs() {
            self.session_ttl_secs = file_config.session_ttl_secs;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ffmpeg_path.is_empty() {
            return Err(anyhow::anyhow!("ffmpeg path cannot be empty"));
        }
        if self.ffprobe_path.is_empty() {
            return Err(anyhow::anyhow!("ffprobe path cannot be empty"));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("max_upload_bytes must be greater than 0"));
        }
        if self.session_ttl_secs == 0 {
            return Err(anyhow::anyhow!("session_ttl_secs must be greater than 0"));
        }
        Ok(())
    }

    /// Thread count handed to ffmpeg, detecting the CPU count when unset
    pub fn encoder_threads(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        num_cpus::get().min(16)
    }
}

// Default value functions
fn default_port() -> u16 {
    32145
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_max_upload_bytes() -> usize {
    2 * 1024 * 1024 * 1024
}

fn default_session_ttl_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_from_cli() {
        let cli_content = [
            "CLI",
            "--listen-on-port",
            "8080",
            "--ffmpeg-path",
            "/opt/ffmpeg/bin/ffmpeg",
            "--threads",
            "4",
            "--session-ttl-secs",
            "60",
        ];

        let config = Config::try_parse_from(cli_content).unwrap();

        assert_eq!(config.listen_on_port, 8080);
        assert_eq!(config.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.ffprobe_path, "ffprobe");
        assert_eq!(config.encoder_threads(), 4);
        assert_eq!(config.session_ttl_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_content = r#"
            listen_on_port = 9000
            bind_address = "127.0.0.1"
            ffprobe_path = "/usr/bin/ffprobe"
            max_upload_bytes = 1048576
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();

        assert_eq!(config.listen_on_port, 9000);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert_eq!(config.ffprobe_path, "/usr/bin/ffprobe");
        assert_eq!(config.max_upload_bytes, 1048576);
        assert_eq!(config.session_ttl_secs, 3600);
    }

    #[test]
    fn test_cli_takes_precedence_over_file() {
        let cli = Config::try_parse_from(["CLI", "--listen-on-port", "8080"]).unwrap();
        let file: Config = toml::from_str(
            r#"
            listen_on_port = 9000
            ffmpeg_path = "/usr/bin/ffmpeg"
            threads = 2
        "#,
        )
        .unwrap();

        let merged = cli.merge_with_file(file);
        assert_eq!(merged.listen_on_port, 8080);
        assert_eq!(merged.ffmpeg_path, "/usr/bin/ffmpeg");
        assert_eq!(merged.threads, 2);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = Config {
            max_upload_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            session_ttl_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            ffmpeg_path: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_encoder_threads_detects_when_unset() {
        let threads = Config::default().encoder_threads();
        assert!((1..=16).contains(&threads));
    }
}

// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

pub const DEFAULT_PORT: u16 = 7878;
/// Ids below this value stay free for reserved/system use.
pub const DEFAULT_FIRST_CONNECTION_ID: u32 = 1000;
pub const DEFAULT_MAX_PACKAGE_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
    /// Largest body a peer may announce in a frame header.
    pub max_package_size: u64,
    pub conn_read_buffer_size: usize,
    pub first_connection_id: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_connection: 1024,
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
            conn_read_buffer_size: 4 * 1024,
            first_connection_id: DEFAULT_FIRST_CONNECTION_ID,
        }
    }
}

impl NetworkConfig {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        NetworkConfig {
            ip: ip.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_max_connection(mut self, max_connection: usize) -> Self {
        self.max_connection = max_connection;
        self
    }

    pub fn with_max_package_size(mut self, max_package_size: u64) -> Self {
        self.max_package_size = max_package_size;
        self
    }

    pub fn with_first_connection_id(mut self, first_connection_id: u32) -> Self {
        self.first_connection_id = first_connection_id;
        self
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Where the rolling log file goes when file output is enabled.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub file_output: bool,
    pub dir: String,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            file_output: false,
            dir: "logs".to_string(),
            file_prefix: "framewire.log".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    pub network: NetworkConfig,
    pub log: LogConfig,
}

impl TransportConfig {
    /// Loads the config file at `path`; `FRAMEWIRE__SECTION__KEY` environment
    /// variables override file values.
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<TransportConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(
                config::Environment::with_prefix("FRAMEWIRE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let transport_config: TransportConfig = config.try_deserialize()?;
        if transport_config.network.max_connection == 0 {
            return Err(AppError::InvalidValue(
                "network.max_connection must be at least 1".to_string(),
            ));
        }

        Ok(transport_config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_leave_low_ids_reserved() {
        let config = NetworkConfig::default();
        assert_eq!(config.first_connection_id, 1000);
        assert_eq!(config.listen_address(), "127.0.0.1:7878");
    }

    #[test]
    fn builder_overrides() {
        let config = NetworkConfig::new("0.0.0.0", 0)
            .with_max_connection(2)
            .with_max_package_size(64)
            .with_first_connection_id(1);
        assert_eq!(config.listen_address(), "0.0.0.0:0");
        assert_eq!(config.max_connection, 2);
        assert_eq!(config.max_package_size, 64);
        assert_eq!(config.first_connection_id, 1);
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[network]\nport = 9100\nmax_package_size = 1048576").unwrap();

        let config = TransportConfig::set_up_config(file.path()).unwrap();
        assert_eq!(config.network.port, 9100);
        assert_eq!(config.network.max_package_size, 1_048_576);
        assert_eq!(config.network.ip, "127.0.0.1");
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn zero_max_connection_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[network]\nmax_connection = 0").unwrap();

        let result = TransportConfig::set_up_config(file.path());
        assert!(matches!(result, Err(AppError::InvalidValue(_))));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = TransportConfig::set_up_config("/nonexistent/framewire.toml");
        assert!(matches!(result, Err(AppError::ConfigFileError(_))));
    }
}

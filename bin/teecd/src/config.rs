//! On-disk configuration for the `teecd` daemon.
//!
//! Grounded on the ambient stack note in SPEC_FULL.md §0: `serde` +
//! `toml`, the same pairing `tee-broker`'s `BrokerConfig` values are
//! populated from when this binary starts it up.

use std::path::PathBuf;

use serde::Deserialize;
use tee_broker::SocketAddrKind;

fn default_client_device() -> String {
    tee_driver::CLIENT_DEV_PATH.to_string()
}

fn default_private_device() -> String {
    tee_driver::PRIVATE_DEV_PATH.to_string()
}

fn default_broker_socket_name() -> String {
    "tc_ns_socket".to_string()
}

fn default_passwd_path() -> PathBuf {
    PathBuf::from("/etc/passwd")
}

fn default_dynamic_ta_dir() -> PathBuf {
    PathBuf::from("/data/vendor/teegw/sec_load")
}

fn default_data_tasklet_concurrency() -> usize {
    8
}

fn default_data_tasklet_buffer_kb() -> usize {
    64
}

fn default_protocol_major() -> u16 {
    tee_broker::PROTOCOL_MAJOR
}

fn default_protocol_minor() -> u16 {
    tee_broker::PROTOCOL_MINOR
}

/// Top-level daemon configuration, loaded from a TOML file (or left at
/// its defaults when none is given on the command line).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Client-facing TEE device the broker opens on behalf of each
    /// authenticated CA, and every agent registers against.
    #[serde(default = "default_client_device")]
    pub client_device_path: String,
    /// Private device used for the one-time driver version probe.
    #[serde(default = "default_private_device")]
    pub private_device_path: String,
    /// Abstract-namespace name the broker listens on.
    #[serde(default = "default_broker_socket_name")]
    pub broker_socket_name: String,
    /// passwd-style file used for username lookups during CA
    /// identification.
    #[serde(default = "default_passwd_path")]
    pub passwd_path: PathBuf,
    /// Directory the secure-image loader is willing to read `.sec`
    /// images from.
    #[serde(default = "default_dynamic_ta_dir")]
    pub dynamic_ta_dir: PathBuf,
    /// Driver protocol version this daemon expects at startup.
    #[serde(default = "default_protocol_major")]
    pub expect_protocol_major: u16,
    /// Driver protocol version this daemon expects at startup.
    #[serde(default = "default_protocol_minor")]
    pub expect_protocol_minor: u16,
    /// Worker thread count for the data tasklet's function-table
    /// dispatch.
    #[serde(default = "default_data_tasklet_concurrency")]
    pub data_tasklet_concurrency: usize,
    /// Size, in KiB, of each half (task queue / result queue) of the
    /// data tasklet's shared-memory ring.
    #[serde(default = "default_data_tasklet_buffer_kb")]
    pub data_tasklet_buffer_kb: usize,
    /// When set, start a Prometheus exporter listening on this address
    /// (e.g. `"127.0.0.1:9090"`).
    #[serde(default)]
    pub metrics_listen_addr: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client_device_path: default_client_device(),
            private_device_path: default_private_device(),
            broker_socket_name: default_broker_socket_name(),
            passwd_path: default_passwd_path(),
            dynamic_ta_dir: default_dynamic_ta_dir(),
            expect_protocol_major: default_protocol_major(),
            expect_protocol_minor: default_protocol_minor(),
            data_tasklet_concurrency: default_data_tasklet_concurrency(),
            data_tasklet_buffer_kb: default_data_tasklet_buffer_kb(),
            metrics_listen_addr: None,
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to built-in
    /// defaults for any field the file omits.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// This daemon's broker listen address.
    pub fn broker_socket(&self) -> SocketAddrKind {
        SocketAddrKind::Abstract(self.broker_socket_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_an_empty_toml_document() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.client_device_path, tee_driver::CLIENT_DEV_PATH);
        assert_eq!(cfg.data_tasklet_concurrency, 8);
    }

    #[test]
    fn a_partial_document_overrides_only_the_fields_it_names() {
        let cfg: Config = toml::from_str("dynamic_ta_dir = \"/opt/ta\"\n").unwrap();
        assert_eq!(cfg.dynamic_ta_dir, PathBuf::from("/opt/ta"));
        assert_eq!(cfg.broker_socket_name, "tc_ns_socket");
    }
}

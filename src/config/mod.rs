//! Configuration module
//!
//! Startup options come from command-line flags, optionally backed by a
//! TOML file; flags win. Everything funnels through [`NodeConfig::validate`],
//! which enforces the cross-field rules before any worker starts:
//! a controller address makes all three switch-identity fields mandatory,
//! and a switch-identity field without a controller address is an error.

use std::fmt;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{parse_mac, NodeAddress};

/// Configuration errors
///
/// All of these are fatal before the worker starts and name the option a
/// user has to fix.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required option: {0}")]
    Missing(&'static str),

    #[error("option {0} is only meaningful together with --controller")]
    RequiresController(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// The switch identity a sink presents to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchIdentity {
    /// Opaque datapath id, at most 8 encoded bytes survive on the wire
    pub dpid: String,
    /// Textual MAC, validated as six hex octets
    pub mac: String,
    /// Virtual switch port number
    pub port: u64,
}

/// A `host:port` controller endpoint, resolved at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for ControllerAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("{s:?} is not host:port"))?;
        if host.is_empty() {
            return Err(format!("{s:?} has an empty host"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| format!("{port:?} is not a TCP port"))?;
        Ok(ControllerAddr {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ControllerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What kind of worker this process runs
#[derive(Debug, Clone)]
pub enum Role {
    /// Ordinary node: no controller connectivity
    Mote,
    /// Border node bridging to the controller as a virtual switch
    Sink {
        controller: ControllerAddr,
        switch: SwitchIdentity,
    },
}

/// Raw, unvalidated startup options
///
/// Fields are optional so a flag layer and a file layer can be merged
/// before validation decides what is actually missing.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub net_id: Option<u16>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub ip: Option<String>,
    pub topology: Option<PathBuf>,
    pub log_level: Option<String>,
    pub controller: Option<String>,
    pub switch_dpid: Option<String>,
    pub switch_mac: Option<String>,
    pub switch_port: Option<u64>,
}

/// Options after validation, ready to build a worker from
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub net_id: u8,
    pub address: NodeAddress,
    pub port: u16,
    /// Listening IP; `None` means "resolve the host's own address"
    pub ip: Option<String>,
    pub topology: PathBuf,
    pub log_level: String,
    pub role: Role,
}

impl NodeConfig {
    /// Overlay `fallback` under `self`: present fields of `self` win.
    pub fn merged_with(self, fallback: NodeConfig) -> NodeConfig {
        NodeConfig {
            net_id: self.net_id.or(fallback.net_id),
            address: self.address.or(fallback.address),
            port: self.port.or(fallback.port),
            ip: self.ip.or(fallback.ip),
            log_level: self.log_level.or(fallback.log_level),
            topology: self.topology.or(fallback.topology),
            controller: self.controller.or(fallback.controller),
            switch_dpid: self.switch_dpid.or(fallback.switch_dpid),
            switch_mac: self.switch_mac.or(fallback.switch_mac),
            switch_port: self.switch_port.or(fallback.switch_port),
        }
    }

    /// Enforce presence, ranges and the controller/switch-identity rules.
    pub fn validate(self) -> ConfigResult<ValidatedConfig> {
        let net_id = self.net_id.ok_or(ConfigError::Missing("--net-id"))?;
        let net_id = u8::try_from(net_id).map_err(|_| ConfigError::Invalid {
            field: "--net-id",
            reason: format!("{net_id} is outside 0-255"),
        })?;

        let address = self
            .address
            .ok_or(ConfigError::Missing("--address"))?
            .parse::<NodeAddress>()
            .map_err(|e| ConfigError::Invalid {
                field: "--address",
                reason: e.to_string(),
            })?;

        let port = self.port.ok_or(ConfigError::Missing("--port"))?;
        let topology = self.topology.ok_or(ConfigError::Missing("--topology"))?;
        let log_level = self.log_level.unwrap_or_else(|| "error".to_string());

        let role = match self.controller {
            Some(controller) => {
                let controller =
                    controller
                        .parse::<ControllerAddr>()
                        .map_err(|reason| ConfigError::Invalid {
                            field: "--controller",
                            reason,
                        })?;
                let dpid = self
                    .switch_dpid
                    .ok_or(ConfigError::Missing("--switch-dpid"))?;
                let mac = self.switch_mac.ok_or(ConfigError::Missing("--switch-mac"))?;
                parse_mac(&mac).map_err(|e| ConfigError::Invalid {
                    field: "--switch-mac",
                    reason: e.to_string(),
                })?;
                let switch_port = self
                    .switch_port
                    .ok_or(ConfigError::Missing("--switch-port"))?;
                Role::Sink {
                    controller,
                    switch: SwitchIdentity {
                        dpid,
                        mac,
                        port: switch_port,
                    },
                }
            }
            None => {
                // Partial switch identity with nowhere to register is a
                // configuration mistake, not something to ignore.
                if self.switch_dpid.is_some() {
                    return Err(ConfigError::RequiresController("--switch-dpid"));
                }
                if self.switch_mac.is_some() {
                    return Err(ConfigError::RequiresController("--switch-mac"));
                }
                if self.switch_port.is_some() {
                    return Err(ConfigError::RequiresController("--switch-port"));
                }
                Role::Mote
            }
        };

        Ok(ValidatedConfig {
            net_id,
            address,
            port,
            ip: self.ip,
            topology,
            log_level,
            role,
        })
    }
}

/// TOML file counterpart of the command-line surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub controller: ControllerSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    pub net_id: Option<u16>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub ip: Option<String>,
    pub topology: Option<PathBuf>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerSection {
    pub address: Option<String>,
    pub switch_dpid: Option<String>,
    pub switch_mac: Option<String>,
    pub switch_port: Option<u64>,
}

impl FileConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

impl From<FileConfig> for NodeConfig {
    fn from(file: FileConfig) -> Self {
        NodeConfig {
            net_id: file.node.net_id,
            address: file.node.address,
            port: file.node.port,
            ip: file.node.ip,
            topology: file.node.topology,
            log_level: file.node.log_level,
            controller: file.controller.address,
            switch_dpid: file.controller.switch_dpid,
            switch_mac: file.controller.switch_mac,
            switch_port: file.controller.switch_port,
        }
    }
}

/// Registration socket for a validated listening IP and UDP port.
pub fn registration_socket(ip: &str, port: u16) -> ConfigResult<SocketAddrV4> {
    let ip = ip.parse().map_err(|_| ConfigError::Invalid {
        field: "--ip",
        reason: format!("{ip:?} is not an IPv4 address"),
    })?;
    Ok(SocketAddrV4::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn mote_config() -> NodeConfig {
        NodeConfig {
            net_id: Some(1),
            address: Some("0.1".to_string()),
            port: Some(7001),
            topology: Some(PathBuf::from("topology.txt")),
            ..Default::default()
        }
    }

    fn sink_config() -> NodeConfig {
        NodeConfig {
            controller: Some("127.0.0.1:6653".to_string()),
            switch_dpid: Some("sw1".to_string()),
            switch_mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
            switch_port: Some(9),
            ..mote_config()
        }
    }

    #[test]
    fn test_mote_without_controller() {
        let config = mote_config().validate().unwrap();
        assert!(matches!(config.role, Role::Mote));
        assert_eq!(config.net_id, 1);
        assert_eq!(config.address, NodeAddress::from_octets(0, 1));
        assert_eq!(config.log_level, "error");
    }

    #[test]
    fn test_sink_with_full_identity() {
        let config = sink_config().validate().unwrap();
        match config.role {
            Role::Sink { controller, switch } => {
                assert_eq!(controller.host, "127.0.0.1");
                assert_eq!(controller.port, 6653);
                assert_eq!(switch.dpid, "sw1");
                assert_eq!(switch.port, 9);
            }
            Role::Mote => panic!("expected a sink role"),
        }
    }

    #[test]
    fn test_controller_without_switch_mac_names_the_field() {
        let config = NodeConfig {
            switch_mac: None,
            ..sink_config()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("--switch-mac")));
    }

    #[test]
    fn test_controller_without_dpid_names_the_field() {
        let config = NodeConfig {
            switch_dpid: None,
            ..sink_config()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Missing("--switch-dpid")
        ));
    }

    #[test]
    fn test_switch_field_without_controller_is_rejected() {
        let config = NodeConfig {
            switch_port: Some(9),
            ..mote_config()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::RequiresController("--switch-port")
        ));
    }

    #[test]
    fn test_net_id_out_of_range_is_rejected_not_truncated() {
        let config = NodeConfig {
            net_id: Some(300),
            ..mote_config()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid {
                field: "--net-id",
                ..
            }
        ));
    }

    #[test]
    fn test_bad_switch_mac_is_rejected_before_startup() {
        let config = NodeConfig {
            switch_mac: Some("aa:bb:cc".to_string()),
            ..sink_config()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid {
                field: "--switch-mac",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_required_fields_are_named() {
        let err = NodeConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("--net-id")));

        let err = NodeConfig {
            net_id: Some(1),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("--address")));
    }

    #[test]
    fn test_controller_addr_parsing() {
        let addr: ControllerAddr = "10.0.0.1:6653".parse().unwrap();
        assert_eq!(addr.host, "10.0.0.1");
        assert_eq!(addr.port, 6653);
        assert_eq!(addr.to_string(), "10.0.0.1:6653");

        assert!("10.0.0.1".parse::<ControllerAddr>().is_err());
        assert!(":6653".parse::<ControllerAddr>().is_err());
        assert!("host:notaport".parse::<ControllerAddr>().is_err());
    }

    #[test]
    fn test_flags_override_file_values() {
        let file = NodeConfig {
            net_id: Some(1),
            port: Some(7001),
            ..Default::default()
        };
        let flags = NodeConfig {
            port: Some(9000),
            ..Default::default()
        };
        let merged = flags.merged_with(file);
        assert_eq!(merged.net_id, Some(1));
        assert_eq!(merged.port, Some(9000));
    }

    #[test]
    fn test_load_file_config() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            b"[node]\n\
              net_id = 1\n\
              address = \"0.1\"\n\
              port = 7001\n\
              topology = \"topology.txt\"\n\
              \n\
              [controller]\n\
              address = \"127.0.0.1:6653\"\n\
              switch_dpid = \"sw1\"\n\
              switch_mac = \"aa:bb:cc:dd:ee:ff\"\n\
              switch_port = 9\n",
        )
        .unwrap();

        let config: NodeConfig = FileConfig::load(file.path()).unwrap().into();
        let validated = config.validate().unwrap();
        assert!(matches!(validated.role, Role::Sink { .. }));
    }

    #[test]
    fn test_registration_socket() {
        let socket = registration_socket("10.0.0.5", 7001).unwrap();
        assert_eq!(socket.to_string(), "10.0.0.5:7001");
        assert!(registration_socket("example.org", 7001).is_err());
    }
}

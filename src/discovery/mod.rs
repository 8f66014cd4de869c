//! Neighbor discovery module
//!
//! Real deployments learn their neighbors over the air; the standalone node
//! reads them from a topology file instead. Each non-comment line names one
//! neighbor:
//!
//! ```text
//! # address,rssi,udp socket
//! 0.2,200,127.0.0.1:7002
//! 0.3,180,127.0.0.1:7003
//! ```
//!
//! The runtime treats the table as an opaque link-quality feed; nothing
//! outside this module depends on the file format.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::protocol::NodeAddress;

/// Topology source errors
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("cannot read topology file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// One entry of the topology feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    /// Protocol-level address of the peer
    pub addr: NodeAddress,
    /// Received signal strength, 0-255
    pub rssi: u8,
    /// UDP socket the peer listens on
    pub socket: SocketAddr,
}

/// The set of directly reachable peers
#[derive(Debug, Clone, Default)]
pub struct NeighborTable {
    neighbors: HashMap<NodeAddress, Neighbor>,
}

impl NeighborTable {
    /// Load the table from a topology file.
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        let contents = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, TopologyError> {
        let malformed = |line: usize, reason: String| TopologyError::Malformed {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let mut neighbors = HashMap::new();
        for (index, raw) in contents.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split(',').map(str::trim);
            let addr = fields
                .next()
                .ok_or_else(|| malformed(line_no, "missing address".into()))?
                .parse::<NodeAddress>()
                .map_err(|e| malformed(line_no, e.to_string()))?;
            let rssi = fields
                .next()
                .ok_or_else(|| malformed(line_no, "missing rssi".into()))?
                .parse::<u8>()
                .map_err(|_| malformed(line_no, "rssi is not a 0-255 value".into()))?;
            let socket = fields
                .next()
                .ok_or_else(|| malformed(line_no, "missing socket address".into()))?
                .parse::<SocketAddr>()
                .map_err(|e| malformed(line_no, e.to_string()))?;
            if fields.next().is_some() {
                return Err(malformed(line_no, "trailing fields after socket".into()));
            }

            neighbors.insert(addr, Neighbor { addr, rssi, socket });
        }

        Ok(NeighborTable { neighbors })
    }

    pub fn get(&self, addr: NodeAddress) -> Option<&Neighbor> {
        self.neighbors.get(&addr)
    }

    /// UDP socket of the given peer, if it is a neighbor
    pub fn socket_of(&self, addr: NodeAddress) -> Option<SocketAddr> {
        self.neighbors.get(&addr).map(|n| n.socket)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.values()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

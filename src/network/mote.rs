//! Mote runtime
//!
//! An ordinary sensor node: binds its UDP socket, learns its neighbors from
//! the topology source and then sits in a receive loop, parsing each
//! datagram through the packet codec. Frames for this node are delivered,
//! frames in transit are pushed on toward their destination. A mote never
//! talks to a controller.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::config::ValidatedConfig;
use crate::discovery::{NeighborTable, TopologyError};
use crate::protocol::{
    FrameError, NodeAddress, PacketBuffer, PacketType, RegProxyPacket, MAX_PACKET_LEN,
};

use super::Node;

/// Ordinary node runtime
pub struct Mote {
    net_id: u8,
    address: NodeAddress,
    listen_port: u16,
    neighbors: NeighborTable,
}

impl Mote {
    /// Build a mote from validated startup options, loading the neighbor
    /// table eagerly so a bad topology file fails before the loop starts.
    pub fn new(config: &ValidatedConfig) -> Result<Self, TopologyError> {
        let neighbors = NeighborTable::load(&config.topology)?;
        tracing::info!(
            "node {} knows {} neighbor(s) from {}",
            config.address,
            neighbors.len(),
            config.topology.display()
        );
        Ok(Self {
            net_id: config.net_id,
            address: config.address,
            listen_port: config.port,
            neighbors,
        })
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn net_id(&self) -> u8 {
        self.net_id
    }

    pub(crate) fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub(crate) async fn bind(&self) -> std::io::Result<UdpSocket> {
        let socket = UdpSocket::bind(("0.0.0.0", self.listen_port)).await?;
        tracing::info!("node {} listening on {}", self.address, socket.local_addr()?);
        Ok(socket)
    }

    /// Parse and dispatch one received datagram. Malformed frames are
    /// dropped with a warning; the loop must survive any input.
    pub(crate) async fn handle_datagram(&self, socket: &UdpSocket, bytes: &[u8], from: SocketAddr) {
        let frame = match PacketBuffer::from_bytes(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("dropping malformed frame from {}: {}", from, e);
                return;
            }
        };

        if frame.net_id() != self.net_id {
            tracing::debug!(
                "dropping frame for network {} (ours is {})",
                frame.net_id(),
                self.net_id
            );
            return;
        }

        let typ = match frame.typ() {
            Ok(typ) => typ,
            Err(e) => {
                tracing::warn!("dropping frame from {}: {}", from, e);
                return;
            }
        };

        if frame.dst() == self.address || frame.dst().is_broadcast() {
            self.deliver(typ, frame);
        } else {
            self.forward(socket, frame).await;
        }
    }

    /// A frame addressed to this node (or broadcast) has arrived.
    fn deliver(&self, typ: PacketType, frame: PacketBuffer) {
        match typ {
            PacketType::Data => {
                tracing::info!(
                    "data from {}: {} byte(s)",
                    frame.src(),
                    frame.payload_len()
                );
            }
            PacketType::RegProxy => match RegProxyPacket::from_buffer(frame) {
                Ok(reg) => tracing::info!(
                    "switch {} ({}) announced at {}",
                    reg.switch_dpid(),
                    reg.switch_mac(),
                    reg.socket_address()
                ),
                Err(e) => tracing::warn!("bad registration frame: {}", e),
            },
            other => {
                tracing::debug!("{} frame from {}", other, frame.src());
            }
        }
    }

    /// Push a frame in transit toward its destination, if a route exists.
    async fn forward(&self, socket: &UdpSocket, mut frame: PacketBuffer) {
        if frame.decrement_ttl() == 0 {
            tracing::debug!("ttl expired for frame from {} to {}", frame.src(), frame.dst());
            return;
        }

        let dst = frame.dst();
        let Some(peer) = self.neighbors.socket_of(dst) else {
            tracing::warn!("no route to {}, dropping frame from {}", dst, frame.src());
            return;
        };

        frame.set_nxh(dst);
        if let Err(e) = socket.send_to(frame.as_bytes(), peer).await {
            tracing::warn!("forwarding to {} failed: {}", peer, e);
        }
    }
}

#[async_trait]
impl Node for Mote {
    async fn run(self: Box<Self>, mut shutdown: mpsc::Receiver<()>) -> anyhow::Result<()> {
        let socket = self.bind().await?;
        let mut buf = [0u8; MAX_PACKET_LEN];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    let (n, from) = result?;
                    self.handle_datagram(&socket, &buf[..n], from).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("node {} shutting down", self.address);
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Build an outgoing data frame from this node to `dst`.
///
/// Kept beside the runtime because every role uses the same origin rules:
/// source is this node, next hop starts at the destination.
pub fn build_data_frame(
    net_id: u8,
    src: NodeAddress,
    dst: NodeAddress,
    payload: &[u8],
) -> Result<PacketBuffer, FrameError> {
    let frame_len = crate::protocol::HEADER_LEN + payload.len();
    if frame_len > MAX_PACKET_LEN {
        return Err(FrameError::TooLong(frame_len));
    }
    let mut frame = PacketBuffer::new(frame_len);
    frame.set_net_id(net_id);
    frame.set_typ(PacketType::Data);
    frame.set_src(src);
    frame.set_dst(dst);
    frame.set_nxh(dst);
    frame.set_payload_range(0, payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn config_with_topology(topology: PathBuf) -> ValidatedConfig {
        ValidatedConfig {
            net_id: 1,
            address: NodeAddress::from_octets(0, 1),
            port: 0, // ephemeral, tests bind wherever is free
            ip: None,
            topology,
            log_level: "error".to_string(),
            role: Role::Mote,
        }
    }

    fn mote_with_neighbors(lines: &str) -> (Mote, NamedTempFile) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(lines.as_bytes()).unwrap();
        let mote = Mote::new(&config_with_topology(file.path().to_path_buf())).unwrap();
        (mote, file)
    }

    #[test]
    fn test_new_fails_on_missing_topology() {
        let config = config_with_topology(PathBuf::from("/nonexistent/topology.txt"));
        assert!(Mote::new(&config).is_err());
    }

    #[test]
    fn test_build_data_frame_sets_origin_header() {
        let src = NodeAddress::new(1);
        let dst = NodeAddress::new(2);
        let frame = build_data_frame(1, src, dst, b"hi").unwrap();
        assert_eq!(frame.src(), src);
        assert_eq!(frame.dst(), dst);
        assert_eq!(frame.nxh(), dst);
        assert_eq!(frame.typ().unwrap(), PacketType::Data);
        assert_eq!(frame.payload(), b"hi");
    }

    #[test]
    fn test_build_data_frame_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PACKET_LEN];
        assert!(matches!(
            build_data_frame(1, NodeAddress::new(1), NodeAddress::new(2), &payload),
            Err(FrameError::TooLong(_))
        ));
    }

    #[tokio::test]
    async fn test_mote_forwards_toward_known_destination() {
        // destination node 0.2 listens on an ephemeral socket
        let dst_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dst_addr = dst_socket.local_addr().unwrap();

        let (mote, _file) = mote_with_neighbors(&format!("0.2,200,{dst_addr}\n"));
        let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // a frame in transit: addressed to 0.2, currently at 0.1
        let frame = build_data_frame(1, NodeAddress::new(9), NodeAddress::from_octets(0, 2), b"x")
            .unwrap();
        mote.handle_datagram(&relay, frame.as_bytes(), "127.0.0.1:9999".parse().unwrap())
            .await;

        let mut buf = [0u8; MAX_PACKET_LEN];
        let (n, _) = dst_socket.recv_from(&mut buf).await.unwrap();
        let forwarded = PacketBuffer::from_bytes(&buf[..n]).unwrap();
        assert_eq!(forwarded.dst(), NodeAddress::from_octets(0, 2));
        assert_eq!(forwarded.ttl(), crate::protocol::DEFAULT_TTL - 1);
    }

    #[tokio::test]
    async fn test_mote_drops_malformed_and_foreign_frames() {
        let (mote, _file) = mote_with_neighbors("0.2,200,127.0.0.1:1\n");
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let from = "127.0.0.1:9999".parse().unwrap();

        // neither of these may panic or send anything
        mote.handle_datagram(&socket, &[1, 2, 3], from).await;

        let foreign =
            build_data_frame(7, NodeAddress::new(9), NodeAddress::from_octets(0, 1), b"x").unwrap();
        mote.handle_datagram(&socket, foreign.as_bytes(), from).await;
    }

    #[tokio::test]
    async fn test_mote_run_stops_on_shutdown() {
        let (mote, _file) = mote_with_neighbors("0.2,200,127.0.0.1:1\n");
        let (tx, rx) = mpsc::channel(1);

        let worker = tokio::spawn(Box::new(mote).run(rx));
        tx.send(()).await.unwrap();
        worker.await.unwrap().unwrap();
    }
}

//! Proxy registration packet
//!
//! The frame a sink broadcasts to announce itself to the controller as a
//! virtual switch: datapath id, MAC, switch port, and the IP/TCP socket the
//! controller can reach it on. Payload layout, relative to the header end:
//!
//! ```text
//! 0        8       14          22      26    28
//! | dpid   | mac   | port(u64) | ipv4  | tcp |
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};

use super::{FrameError, NodeAddress, PacketBuffer, PacketType, HEADER_LEN};

const DPID_LEN: usize = 8;
const MAC_LEN: usize = 6;
const PORT_LEN: usize = 8;
const IP_LEN: usize = 4;
const TCP_LEN: usize = 2;

const DPID_INDEX: usize = 0;
const MAC_INDEX: usize = DPID_INDEX + DPID_LEN;
const PORT_INDEX: usize = MAC_INDEX + MAC_LEN;
const IP_INDEX: usize = PORT_INDEX + PORT_LEN;
const TCP_INDEX: usize = IP_INDEX + IP_LEN;

/// Registration payload size in bytes
pub const REG_PROXY_PAYLOAD_LEN: usize = TCP_INDEX + TCP_LEN;

/// A typed view over a `REG_PROXY` frame
///
/// Setters consume and return the packet, so construction reads as a single
/// staged expression and the buffer never escapes half-written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegProxyPacket {
    buf: PacketBuffer,
}

impl RegProxyPacket {
    /// Build a registration announcing the given switch identity.
    ///
    /// The destination starts out as broadcast and is then, like source and
    /// next hop, pinned to the announcing node itself: the frame is
    /// origin-local and not yet routed.
    pub fn new(
        net_id: u8,
        src: NodeAddress,
        switch_dpid: &str,
        switch_mac: &str,
        switch_port: u64,
        socket: SocketAddrV4,
    ) -> Result<Self, FrameError> {
        let mut buf = PacketBuffer::new(HEADER_LEN + REG_PROXY_PAYLOAD_LEN);
        buf.set_net_id(net_id);
        buf.set_src(src);
        buf.set_dst(NodeAddress::BROADCAST);
        buf.set_typ(PacketType::RegProxy);

        let mut packet = RegProxyPacket { buf }
            .set_switch_mac(switch_mac)?
            .set_switch_dpid(switch_dpid)
            .set_switch_port(switch_port)
            .set_socket_address(socket);
        packet.buf.set_src(src);
        packet.buf.set_dst(src);
        packet.buf.set_nxh(src);
        Ok(packet)
    }

    /// Wrap an already-parsed buffer, checking the type tag.
    pub fn from_buffer(buf: PacketBuffer) -> Result<Self, FrameError> {
        match buf.typ()? {
            PacketType::RegProxy => {}
            actual => {
                return Err(FrameError::WrongType {
                    expected: PacketType::RegProxy,
                    actual,
                })
            }
        }
        if buf.payload_len() < REG_PROXY_PAYLOAD_LEN {
            return Err(FrameError::TooShort {
                expected: HEADER_LEN + REG_PROXY_PAYLOAD_LEN,
                actual: buf.len(),
            });
        }
        Ok(RegProxyPacket { buf })
    }

    /// Write the switch MAC from its `xx:xx:xx:xx:xx:xx` textual form.
    ///
    /// The whole string is validated before any byte is written, so a bad
    /// MAC never leaves a half-updated field behind.
    pub fn set_switch_mac(mut self, mac: &str) -> Result<Self, FrameError> {
        let octets = parse_mac(mac)?;
        self.buf.set_payload_range(MAC_INDEX, &octets);
        Ok(self)
    }

    /// The switch MAC as lowercase colon-separated hex
    pub fn switch_mac(&self) -> String {
        self.buf
            .payload_range(MAC_INDEX, MAC_INDEX + MAC_LEN)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Write the datapath id.
    ///
    /// Ids longer than 8 bytes are truncated, shorter ones leave the
    /// zero-filled remainder in place. This is the protocol's deliberate
    /// lossy encoding, not an error.
    pub fn set_switch_dpid(mut self, dpid: &str) -> Self {
        let bytes = dpid.as_bytes();
        let len = bytes.len().min(DPID_LEN);
        self.buf.set_payload_range(DPID_INDEX, &bytes[..len]);
        self
    }

    /// The datapath id, with trailing NUL padding trimmed.
    ///
    /// The wire field always carries 8 bytes; the padding is an encoding
    /// artifact, so short ids round-trip to what the caller wrote.
    pub fn switch_dpid(&self) -> String {
        let raw = self.buf.payload_range(DPID_INDEX, DPID_INDEX + DPID_LEN);
        let end = raw
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    /// Write the switch port as a big-endian u64.
    pub fn set_switch_port(mut self, port: u64) -> Self {
        self.buf.set_payload_range(PORT_INDEX, &port.to_be_bytes());
        self
    }

    pub fn switch_port(&self) -> u64 {
        let b = self.buf.payload_range(PORT_INDEX, PORT_INDEX + PORT_LEN);
        u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    /// Write the reachable socket: 4 raw IPv4 octets, then the TCP port
    /// high-byte-first.
    pub fn set_socket_address(mut self, socket: SocketAddrV4) -> Self {
        self.buf.set_payload_range(IP_INDEX, &socket.ip().octets());
        self.buf
            .set_payload_range(TCP_INDEX, &socket.port().to_be_bytes());
        self
    }

    pub fn socket_address(&self) -> SocketAddrV4 {
        let ip = self.buf.payload_range(IP_INDEX, IP_INDEX + IP_LEN);
        let addr = Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]);
        let port = u16::from_be_bytes([
            self.buf.payload_at(TCP_INDEX),
            self.buf.payload_at(TCP_INDEX + 1),
        ]);
        SocketAddrV4::new(addr, port)
    }

    pub fn net_id(&self) -> u8 {
        self.buf.net_id()
    }

    pub fn src(&self) -> NodeAddress {
        self.buf.src()
    }

    pub fn dst(&self) -> NodeAddress {
        self.buf.dst()
    }

    pub fn nxh(&self) -> NodeAddress {
        self.buf.nxh()
    }

    /// The frame as raw bytes, ready for a socket
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    /// Give the underlying buffer back
    pub fn into_buffer(self) -> PacketBuffer {
        self.buf
    }
}

impl TryFrom<PacketBuffer> for RegProxyPacket {
    type Error = FrameError;

    fn try_from(buf: PacketBuffer) -> Result<Self, Self::Error> {
        Self::from_buffer(buf)
    }
}

/// Parse a `xx:xx:xx:xx:xx:xx` MAC into its six octets.
///
/// Exactly six colon-separated hex groups, each 0-255; anything else fails
/// without touching any buffer.
pub fn parse_mac(mac: &str) -> Result<[u8; MAC_LEN], FrameError> {
    let invalid = |reason: String| FrameError::InvalidField {
        field: "switch mac",
        reason,
    };
    let groups: Vec<&str> = mac.split(':').collect();
    if groups.len() != MAC_LEN {
        return Err(invalid(format!(
            "expected {MAC_LEN} colon-separated groups, got {}",
            groups.len()
        )));
    }
    let mut octets = [0u8; MAC_LEN];
    for (i, group) in groups.iter().enumerate() {
        octets[i] = u8::from_str_radix(group, 16)
            .map_err(|_| invalid(format!("{group:?} is not a hex byte")))?;
    }
    Ok(octets)
}

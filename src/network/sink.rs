//! Sink runtime
//!
//! The border node. It does everything a mote does, and additionally keeps
//! a TCP link to the SDN controller, on which it first announces itself as
//! a virtual switch with a single proxy-registration frame. Controller
//! traffic after registration is drained and logged; losing the controller
//! mid-run degrades the sink to mote behaviour instead of killing it.

use std::net::SocketAddrV4;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::{ControllerAddr, SwitchIdentity, ValidatedConfig};
use crate::discovery::TopologyError;
use crate::protocol::{RegProxyPacket, MAX_PACKET_LEN};

use super::{ControllerLink, LinkConfig, Mote, Node};

/// Border node runtime
pub struct Sink {
    mote: Mote,
    controller: ControllerAddr,
    switch: SwitchIdentity,
    /// The socket the controller can reach this sink on; goes into the
    /// registration frame verbatim.
    reachable: SocketAddrV4,
    link_config: LinkConfig,
}

impl Sink {
    pub fn new(
        config: &ValidatedConfig,
        controller: ControllerAddr,
        switch: SwitchIdentity,
        reachable: SocketAddrV4,
        link_config: LinkConfig,
    ) -> Result<Self, TopologyError> {
        let mote = Mote::new(config)?;
        Ok(Self {
            mote,
            controller,
            switch,
            reachable,
            link_config,
        })
    }

    fn registration(&self) -> Result<RegProxyPacket, crate::protocol::FrameError> {
        RegProxyPacket::new(
            self.mote.net_id(),
            self.mote.address(),
            &self.switch.dpid,
            &self.switch.mac,
            self.switch.port,
            self.reachable,
        )
    }

    /// Connect and register, inside one bounded retry policy.
    ///
    /// A send that fails on a stale connection counts as a failed attempt
    /// and goes back through connect, so a single hiccup does not kill the
    /// worker while a dead controller still surfaces as a startup error.
    async fn establish(&self) -> anyhow::Result<ControllerLink> {
        let registration = self.registration().context("building registration frame")?;

        let mut last_error: Option<anyhow::Error> = None;
        for attempt in 1..=self.link_config.attempts {
            if attempt > 1 {
                tokio::time::sleep(self.link_config.backoff).await;
            }

            let once = LinkConfig {
                attempts: 1,
                ..self.link_config.clone()
            };
            let result = async {
                let mut link = ControllerLink::connect(&self.controller, &once).await?;
                link.send_frame(registration.as_bytes()).await?;
                Ok::<_, super::ControllerError>(link)
            }
            .await;

            match result {
                Ok(link) => {
                    tracing::info!(
                        "registered switch {} ({}) port {} at {}",
                        self.switch.dpid,
                        self.switch.mac,
                        self.switch.port,
                        self.reachable
                    );
                    return Ok(link);
                }
                Err(e) => {
                    tracing::warn!(
                        "registration attempt {}/{} failed: {}",
                        attempt,
                        self.link_config.attempts,
                        e
                    );
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("no registration attempts configured"))
            .context(format!("controller {} unreachable", self.controller)))
    }
}

#[async_trait]
impl Node for Sink {
    async fn run(self: Box<Self>, mut shutdown: mpsc::Receiver<()>) -> anyhow::Result<()> {
        // Neighbor table is already loaded; announce ourselves before
        // serving the sensor network.
        tracing::info!(
            "sink {} ready with {} neighbor(s), registering with {}",
            self.mote.address(),
            self.mote.neighbors().len(),
            self.controller
        );
        let mut link = self.establish().await?;

        let socket = self.mote.bind().await?;
        let mut buf = [0u8; MAX_PACKET_LEN];
        let mut controller_open = true;

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    let (n, from) = result?;
                    self.mote.handle_datagram(&socket, &buf[..n], from).await;
                }
                result = link.recv_frame(), if controller_open => {
                    match result {
                        Ok(Some(frame)) => {
                            tracing::debug!(
                                "controller frame: type {:#04x}, {} byte(s)",
                                frame.typ_raw(),
                                frame.len()
                            );
                        }
                        Ok(None) => {
                            tracing::warn!("controller closed the connection, continuing without it");
                            controller_open = false;
                        }
                        Err(e) => {
                            tracing::warn!("controller link failed: {}, continuing without it", e);
                            controller_open = false;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("sink {} shutting down", self.mote.address());
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use crate::protocol::{NodeAddress, PacketType};
    use std::io::Write;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tokio::net::TcpListener;

    fn sink_with_controller(controller: ControllerAddr) -> (Sink, NamedTempFile) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"0.2,200,127.0.0.1:7002\n").unwrap();

        let switch = SwitchIdentity {
            dpid: "sw1".to_string(),
            mac: "aa:bb:cc:dd:ee:ff".to_string(),
            port: 9,
        };
        let config = ValidatedConfig {
            net_id: 1,
            address: NodeAddress::from_octets(0, 1),
            port: 0,
            ip: None,
            topology: file.path().to_path_buf(),
            log_level: "error".to_string(),
            role: Role::Sink {
                controller: controller.clone(),
                switch: switch.clone(),
            },
        };
        let link_config = LinkConfig {
            connect_timeout: Duration::from_millis(500),
            attempts: 2,
            backoff: Duration::from_millis(10),
        };
        let reachable = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 7001);
        let sink = Sink::new(&config, controller, switch, reachable, link_config).unwrap();
        (sink, file)
    }

    #[tokio::test]
    async fn test_sink_registers_on_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let controller = ControllerAddr {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
        };

        let (sink, _file) = sink_with_controller(controller);
        let establish = tokio::spawn(async move { sink.establish().await });

        let (stream, peer) = listener.accept().await.unwrap();
        let mut link = ControllerLink::from_stream(stream, peer);
        let frame = link.recv_frame().await.unwrap().unwrap();

        let reg = RegProxyPacket::from_buffer(frame).unwrap();
        assert_eq!(reg.switch_dpid(), "sw1");
        assert_eq!(reg.switch_mac(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(reg.switch_port(), 9);
        assert_eq!(
            reg.socket_address(),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 7001)
        );
        // origin-local: the announcing node is source, destination and next hop
        let me = NodeAddress::from_octets(0, 1);
        assert_eq!(reg.src(), me);
        assert_eq!(reg.dst(), me);
        assert_eq!(reg.nxh(), me);

        establish.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_controller_is_a_startup_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let controller = ControllerAddr {
            host: "127.0.0.1".to_string(),
            port,
        };
        let (sink, _file) = sink_with_controller(controller);
        let (_tx, rx) = mpsc::channel(1);

        assert!(Box::new(sink).run(rx).await.is_err());
    }

    #[tokio::test]
    async fn test_sink_survives_controller_hangup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let controller = ControllerAddr {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
        };

        let (sink, _file) = sink_with_controller(controller);
        let (tx, rx) = mpsc::channel(1);
        let worker = tokio::spawn(Box::new(sink).run(rx));

        // accept the registration, then hang up
        let (stream, peer) = listener.accept().await.unwrap();
        let mut link = ControllerLink::from_stream(stream, peer);
        let frame = link.recv_frame().await.unwrap().unwrap();
        assert!(matches!(frame.typ(), Ok(PacketType::RegProxy)));
        drop(link);

        // the worker keeps serving until told to stop
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).await.unwrap();
        worker.await.unwrap().unwrap();
    }
}

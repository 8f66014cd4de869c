//! Network module - The long-lived node runtimes
//!
//! Provides:
//! - Mote: ordinary node with a UDP receive loop
//! - Sink: mote behaviour plus the controller link and proxy registration
//! - Controller link management with connect timeout and bounded backoff

mod controller;
mod mote;
mod sink;

pub use controller::*;
pub use mote::*;
pub use sink::*;

use std::net::{SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// The one capability a node role has to offer: run until shutdown or a
/// fatal error. The bootstrap starts exactly one worker per process and
/// waits for it; `shutdown` is checked between receive iterations.
#[async_trait]
pub trait Node: Send {
    async fn run(self: Box<Self>, shutdown: mpsc::Receiver<()>) -> anyhow::Result<()>;
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

/// The host's own resolvable IPv4 socket, used as the default registration
/// endpoint when no listening IP is configured.
pub async fn local_ipv4_socket(port: u16) -> std::io::Result<SocketAddrV4> {
    use tokio::net::lookup_host;

    let name = hostname::get()?.to_string_lossy().into_owned();
    let addrs = lookup_host((name.as_str(), port)).await?;

    let result = addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("host {name:?} does not resolve to an IPv4 address"),
            )
        });
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve_host("127.0.0.1", 6653).await.unwrap();
        assert_eq!(addr, "127.0.0.1:6653".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_unknown_host_fails() {
        assert!(resolve_host("definitely-not-a-real-host.invalid", 1)
            .await
            .is_err());
    }
}

use crate::config::MulticastConfig;
use crate::error::{MulticastError, SocketStage};
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{error, trace, warn};

/// This is an abstraction for sending a datagram on a UDP socket, introduced to facilitate
///  mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn send_packet(&self, to: SocketAddr, packet_buf: &[u8]);
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        trace!("UDP socket: sending {} bytes to {:?}", packet_buf.len(), to);

        // datagram loss is an expected mode of operation on this plane - log and move on
        if let Err(e) = self.send_to(packet_buf, to).await {
            error!("error sending UDP datagram to {:?}: {}", to, e);
        }
    }
}

fn new_ipv4_udp_socket() -> Result<Socket, MulticastError> {
    Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(MulticastError::setup(SocketStage::Create))
}

/// Sets up a group's outbound socket on the server: reuse, non-blocking, multicast TTL and
///  loopback per config. The socket is bound to an ephemeral wildcard port, never to the
///  group address - that address is only ever the destination of `send_to`.
pub fn create_send_socket(config: &MulticastConfig) -> Result<Arc<UdpSocket>, MulticastError> {
    let socket = new_ipv4_udp_socket()?;
    socket.set_reuse_address(true)
        .map_err(MulticastError::setup(SocketStage::ReuseAddr))?;
    socket.set_nonblocking(true)
        .map_err(MulticastError::setup(SocketStage::Nonblocking))?;
    socket.set_multicast_ttl_v4(config.ttl)
        .map_err(MulticastError::setup(SocketStage::Ttl))?;
    socket.set_multicast_loop_v4(config.loopback)
        .map_err(MulticastError::setup(SocketStage::Loopback))?;
    socket.bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
        .map_err(MulticastError::setup(SocketStage::Bind))?;

    let socket = UdpSocket::from_std(socket.into())
        .map_err(MulticastError::setup(SocketStage::Create))?;
    Ok(Arc::new(socket))
}

/// Sets up a group's inbound socket: reuse, non-blocking, bound to the group port on the
///  wildcard interface, membership on the default interface. Used by the client for every
///  joined group and by the server to observe ACKs on its own groups.
pub fn create_recv_socket(group_addr: Ipv4Addr, port: u16) -> Result<Arc<UdpSocket>, MulticastError> {
    let socket = new_ipv4_udp_socket()?;
    socket.set_reuse_address(true)
        .map_err(MulticastError::setup(SocketStage::ReuseAddr))?;
    socket.set_nonblocking(true)
        .map_err(MulticastError::setup(SocketStage::Nonblocking))?;
    socket.bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))
        .map_err(MulticastError::setup(SocketStage::Bind))?;

    let socket = UdpSocket::from_std(socket.into())
        .map_err(MulticastError::setup(SocketStage::Create))?;
    socket.join_multicast_v4(group_addr, Ipv4Addr::UNSPECIFIED)
        .map_err(MulticastError::setup(SocketStage::Membership))?;

    trace!("joined {} on port {}", group_addr, port);
    Ok(Arc::new(socket))
}

/// Drops the membership before the socket is closed. Failure to drop is not fatal - the OS
///  releases the membership with the socket anyway.
pub fn drop_membership(socket: &UdpSocket, group_addr: Ipv4Addr) {
    if let Err(e) = socket.leave_multicast_v4(group_addr, Ipv4Addr::UNSPECIFIED) {
        warn!("error dropping membership of {}: {}", group_addr, e);
    }
}

use crate::allocator;
use crate::announce::{Announcement, UnicastSession};
use crate::config::MulticastConfig;
use crate::error::MulticastError;
use crate::frame::{self, Frame, GroupMode};
use crate::group_socket::{self, SendSocket};
use crate::ids::{GroupId, Seq};
use crate::send_buffer::ReliableSendBuffer;
use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt::{Display, Formatter};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

const ACK_RECV_BUFFER_SIZE: usize = 2048;

struct Group {
    endpoint: SocketAddrV4,
    send_socket: Arc<dyn SendSocket>,
    send_buffer: ReliableSendBuffer,
    /// armed (Some) exactly while the send buffer is non-empty
    retransmit_handle: Option<JoinHandle<()>>,
    ack_listener_handle: Option<JoinHandle<()>>,
}

struct GroupManagerInner {
    next_group_id: GroupId,
    groups: FxHashMap<GroupId, Group>,
}

/// Owns the server side of the multicast plane: creation and teardown of groups, unreliable
///  and reliable fan-out, ACK accounting and the retransmission ticks.
///
/// All groups live in a single owning table behind one lock. Background tasks (retransmission,
///  ACK listening) capture only the group id and re-look the group up under the lock on every
///  activation, so a concurrently deleted group simply makes them exit - no task ever holds a
///  reference that outlives the table entry. Sends happen on snapshots taken under the lock
///  and executed after release.
pub struct GroupManager {
    config: Arc<MulticastConfig>,
    inner: Arc<RwLock<GroupManagerInner>>,
}

/// Coordinates and ACK backlog of a live group.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GroupInfo {
    pub group_id: GroupId,
    pub endpoint: SocketAddrV4,
    pub pending_count: usize,
}

impl Display for GroupInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Group ID: {}\nMulticast Address: {}\nPort: {}\nPending Messages: {}",
            self.group_id, self.endpoint.ip(), self.endpoint.port(), self.pending_count,
        )
    }
}

impl Drop for GroupManager {
    fn drop(&mut self) {
        // stop() is the orderly teardown path; this reaps the tasks if it was skipped
        if let Ok(mut inner) = self.inner.try_write() {
            for (_, mut group) in inner.groups.drain() {
                if let Some(handle) = group.retransmit_handle.take() {
                    handle.abort();
                }
                if let Some(handle) = group.ack_listener_handle.take() {
                    handle.abort();
                }
            }
        }
    }
}

impl GroupManager {
    pub fn new(config: MulticastConfig) -> anyhow::Result<GroupManager> {
        config.validate()?;

        info!("multicast group manager initialized");
        Ok(GroupManager {
            config: Arc::new(config),
            inner: Arc::new(RwLock::new(GroupManagerInner {
                next_group_id: GroupId::FIRST,
                groups: FxHashMap::default(),
            })),
        })
    }

    /// Creates a group and returns its id. With explicit coordinates they are used as-is;
    ///  otherwise an endpoint is drawn from the configured space, avoiding collisions with
    ///  live groups of this process.
    pub async fn create_group(&self, explicit: Option<SocketAddrV4>) -> Result<GroupId, MulticastError> {
        let mut inner = self.inner.write().await;

        let endpoint = match explicit {
            Some(endpoint) => endpoint,
            None => {
                let in_use: FxHashSet<SocketAddrV4> = inner.groups.values()
                    .map(|group| group.endpoint)
                    .collect();
                allocator::alloc_endpoint(&mut rand::thread_rng(), &self.config, &in_use)?
            }
        };

        let send_socket = group_socket::create_send_socket(&self.config)?;
        let ack_listener_handle = self.spawn_ack_listener(inner.next_group_id, endpoint)?;

        let group_id = inner.next_group_id;
        inner.next_group_id = inner.next_group_id.next();
        inner.groups.insert(group_id, Group {
            endpoint,
            send_socket: Arc::new(send_socket),
            send_buffer: ReliableSendBuffer::new(),
            retransmit_handle: None,
            ack_listener_handle: Some(ack_listener_handle),
        });

        info!("created multicast group {} at {}", group_id, endpoint);
        Ok(group_id)
    }

    /// Tears a group down: cancels its retransmission timer and ACK listener, closes its
    ///  sockets and silently discards pending reliable messages. Returns false if the group
    ///  is not known.
    pub async fn delete_group(&self, group_id: GroupId) -> bool {
        let mut inner = self.inner.write().await;

        let Some(mut group) = inner.groups.remove(&group_id) else {
            debug!("group {} not found when deleting", group_id);
            return false;
        };

        if let Some(handle) = group.retransmit_handle.take() {
            handle.abort();
        }
        if let Some(handle) = group.ack_listener_handle.take() {
            handle.abort();
        }

        info!("deleted multicast group {}", group_id);
        true
    }

    /// Best-effort fan-out: a single `send_to` of the raw payload. Send errors are logged,
    ///  never surfaced - datagram loss is acceptable on this path.
    pub async fn send_to_group(&self, group_id: GroupId, payload: &[u8]) {
        let target = {
            let inner = self.inner.read().await;
            match inner.groups.get(&group_id) {
                Some(group) => (group.send_socket.clone(), group.endpoint),
                None => {
                    warn!("group {} not found when sending", group_id);
                    return;
                }
            }
        };

        let (socket, endpoint) = target;
        socket.send_packet(SocketAddr::V4(endpoint), payload).await;
    }

    /// Reliable fan-out: assigns the next sequence number, stores the payload until it is
    ///  acknowledged, emits a reliable data frame and arms the retransmission timer if it is
    ///  not already armed. A no-op on a deleted group.
    pub async fn send_reliable_to_group(&self, group_id: GroupId, payload: &[u8]) {
        let (socket, endpoint, seq) = {
            let mut inner = self.inner.write().await;
            let Some(group) = inner.groups.get_mut(&group_id) else {
                warn!("group {} not found when sending reliable message", group_id);
                return;
            };

            let seq = group.send_buffer.register(Bytes::copy_from_slice(payload));
            if group.retransmit_handle.is_none() {
                group.retransmit_handle = Some(self.spawn_retransmit_loop(group_id));
            }
            (group.send_socket.clone(), group.endpoint, seq)
        };

        debug!("sending reliable message seq {} ({} bytes) to group {}", seq, payload.len(), group_id);
        let frame = frame::encode_reliable(seq, payload);
        socket.send_packet(SocketAddr::V4(endpoint), &frame).await;
    }

    /// Removes an acknowledged sequence number from the group's unacked set, disarming the
    ///  retransmission timer when the set becomes empty. Unknown groups and unknown sequence
    ///  numbers are ignored - a late or duplicate ACK is harmless.
    pub async fn ingest_ack(&self, group_id: GroupId, seq: Seq) {
        Self::do_ingest_ack(&self.inner, group_id, seq).await
    }

    async fn do_ingest_ack(inner: &Arc<RwLock<GroupManagerInner>>, group_id: GroupId, seq: Seq) {
        let mut inner = inner.write().await;
        let Some(group) = inner.groups.get_mut(&group_id) else {
            return;
        };

        if group.send_buffer.ack(seq) {
            debug!("acknowledged seq {} for group {}", seq, group_id);
        }
        if group.send_buffer.is_empty() {
            if let Some(handle) = group.retransmit_handle.take() {
                handle.abort();
            }
        }
    }

    pub async fn get_group_info(&self, group_id: GroupId) -> Option<GroupInfo> {
        self.inner.read().await
            .groups.get(&group_id)
            .map(|group| GroupInfo {
                group_id,
                endpoint: group.endpoint,
                pending_count: group.send_buffer.pending_count(),
            })
    }

    /// Server half of the announcement hook: composes the group's coordinates into an
    ///  announcement message and hands it to the unicast session of a newly attached client.
    ///  Strictly one group per announcement.
    pub async fn announce_group(
        &self,
        session: &dyn UnicastSession,
        group_id: GroupId,
        mode: GroupMode,
    ) -> anyhow::Result<()> {
        let info = self.get_group_info(group_id).await
            .ok_or(MulticastError::NotFound(group_id))?;

        let announcement = Announcement {
            addr: *info.endpoint.ip(),
            port: info.endpoint.port(),
            group_id,
            mode,
        };
        session.send(&announcement.compose()).await
    }

    /// Cancels every timer and listener, closes every socket and clears the group table.
    ///  Pending reliable messages are discarded.
    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.write().await;
            inner.groups.drain()
                .flat_map(|(_, mut group)| {
                    [group.retransmit_handle.take(), group.ack_listener_handle.take()]
                })
                .flatten()
                .collect()
        };

        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }

        info!("multicast group manager stopped");
    }

    /// One task per group with pending reliable messages. Re-emits the full current unacked
    ///  snapshot once per tick; sequence numbers are not increased on retransmission. Exits
    ///  when the group is gone, and is aborted when the set drains or the group is deleted.
    fn spawn_retransmit_loop(&self, group_id: GroupId) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let interval = self.config.retransmit_interval;

        tokio::spawn(async move {
            loop {
                time::sleep(interval).await;

                let resend = {
                    let inner = inner.read().await;
                    match inner.groups.get(&group_id) {
                        Some(group) => (group.send_socket.clone(), group.endpoint, group.send_buffer.snapshot()),
                        None => return, // deleted while we slept
                    }
                };

                let (socket, endpoint, entries) = resend;
                if entries.is_empty() {
                    return;
                }

                debug!("retransmitting {} messages to group {}", entries.len(), group_id);
                for (seq, payload) in entries {
                    let frame = frame::encode_reliable(seq, &payload);
                    socket.send_packet(SocketAddr::V4(endpoint), &frame).await;
                }
            }
        })
    }

    /// The server observes ACKs by joining its own group on a second, receive-configured
    ///  socket: receivers emit ACK frames to the group's multicast destination, and loopback
    ///  being disabled on the send socket keeps our own data frames out of this path. Data
    ///  frames from the group (other senders, enabled loopback) are dropped here.
    fn spawn_ack_listener(&self, group_id: GroupId, endpoint: SocketAddrV4) -> Result<JoinHandle<()>, MulticastError> {
        let socket = group_socket::create_recv_socket(*endpoint.ip(), endpoint.port())?;
        let inner = self.inner.clone();

        Ok(tokio::spawn(Self::ack_listener_loop(inner, group_id, socket)))
    }

    async fn ack_listener_loop(
        inner: Arc<RwLock<GroupManagerInner>>,
        group_id: GroupId,
        socket: Arc<UdpSocket>,
    ) {
        let mut buf = vec![0u8; ACK_RECV_BUFFER_SIZE];
        loop {
            let len = match socket.recv_from(&mut buf).await {
                Ok((len, _)) => len,
                Err(e) => {
                    warn!("ack listener for group {}: recv error: {}", group_id, e);
                    continue;
                }
            };

            if let Some(Frame::Ack(seq)) = Frame::parse(&buf[..len], GroupMode::Reliable) {
                Self::do_ingest_ack(&inner, group_id, seq).await;
            }
        }
    }
}

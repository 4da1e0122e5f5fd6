use crate::error::MulticastError;
use crate::frame::{self, Frame, GroupMode};
use crate::group_socket::{self, SendSocket};
use crate::ids::{GroupId, Seq};
use crate::replay::ReplayWindow;
use async_trait::async_trait;
use futures::future::select_all;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, timeout};
use tracing::{debug, error, info, trace, warn};

/// Datagrams are read into a buffer of this size; a UDP payload can never exceed it.
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Upper bound on one pass of the receive loop, and thereby on shutdown latency.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The application handler for payloads delivered from a multicast group.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageDispatcher: Send + Sync + 'static {
    async fn on_message(&self, group_id: GroupId, payload: &[u8]);
}

struct JoinedGroup {
    endpoint: SocketAddrV4,
    mode: GroupMode,
    recv_socket: Arc<UdpSocket>,
    /// ACKs go to the group's multicast destination through the receive socket; split out as
    ///  a trait object so tests can observe them without wire I/O
    ack_socket: Arc<dyn SendSocket>,
    replay: ReplayWindow,
}

struct GroupReceiverInner {
    groups: FxHashMap<GroupId, JoinedGroup>,
    dispatcher: Option<Arc<dyn MessageDispatcher>>,
    worker: Option<JoinHandle<()>>,
}

/// Owns the client side of the multicast plane: joined groups, one worker multiplexing the
///  receive path across all of their sockets, frame parsing, duplicate suppression and ACK
///  emission.
///
/// Public methods may be called from any task; they serialize on one lock. The dispatcher is
///  never invoked while the lock is held: the reference is cloned under the lock and called
///  after release, so a handler may call back into this API freely.
pub struct GroupReceiver {
    inner: Arc<RwLock<GroupReceiverInner>>,
    running: Arc<AtomicBool>,
}

impl Default for GroupReceiver {
    fn default() -> GroupReceiver {
        GroupReceiver::new()
    }
}

impl Drop for GroupReceiver {
    fn drop(&mut self) {
        // stop() is the orderly teardown path; this reaps the worker if it was skipped
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut inner) = self.inner.try_write() {
            if let Some(worker) = inner.worker.take() {
                worker.abort();
            }
        }
    }
}

impl GroupReceiver {
    pub fn new() -> GroupReceiver {
        GroupReceiver {
            inner: Arc::new(RwLock::new(GroupReceiverInner {
                groups: FxHashMap::default(),
                dispatcher: None,
                worker: None,
            })),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers the single application handler. Payloads received before a dispatcher is
    ///  registered are dropped.
    pub async fn set_dispatcher(&self, dispatcher: Arc<dyn MessageDispatcher>) {
        self.inner.write().await.dispatcher = Some(dispatcher);
    }

    /// Creates the group's receive socket, joins the membership and records the group. The
    ///  worker picks the new socket up on its next pass.
    pub async fn join_group(
        &self,
        addr: Ipv4Addr,
        port: u16,
        group_id: GroupId,
        mode: GroupMode,
    ) -> Result<(), MulticastError> {
        let mut inner = self.inner.write().await;

        if inner.groups.contains_key(&group_id) {
            return Err(MulticastError::AlreadyJoined(group_id));
        }

        let recv_socket = group_socket::create_recv_socket(addr, port)?;
        let ack_socket: Arc<dyn SendSocket> = Arc::new(recv_socket.clone());
        inner.groups.insert(group_id, JoinedGroup {
            endpoint: SocketAddrV4::new(addr, port),
            mode,
            recv_socket,
            ack_socket,
            replay: ReplayWindow::new(),
        });

        info!("joined multicast group {} at {}:{}", group_id, addr, port);
        Ok(())
    }

    /// Drops the membership, closes the socket and forgets the group. Returns false if the
    ///  group was not joined.
    pub async fn leave_group(&self, group_id: GroupId) -> bool {
        let mut inner = self.inner.write().await;

        let Some(group) = inner.groups.remove(&group_id) else {
            debug!("not in group {} when leaving", group_id);
            return false;
        };
        group_socket::drop_membership(&group.recv_socket, *group.endpoint.ip());

        info!("left multicast group {}", group_id);
        true
    }

    /// Claims the single receive worker. Fails with `AlreadyRunning` while a worker is live.
    pub async fn start(&self) -> Result<(), MulticastError> {
        let mut inner = self.inner.write().await;

        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MulticastError::AlreadyRunning);
        }

        inner.worker = Some(tokio::spawn(Self::receive_loop(self.inner.clone(), self.running.clone())));
        info!("multicast receiver started");
        Ok(())
    }

    /// Signals the worker to exit, waits for it, then leaves all remaining groups. Shutdown
    ///  latency is bounded by one poll interval plus pending dispatches.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let worker = self.inner.write().await.worker.take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        let group_ids: Vec<GroupId> = self.inner.read().await.groups.keys().copied().collect();
        for group_id in group_ids {
            self.leave_group(group_id).await;
        }

        info!("multicast receiver stopped");
    }

    /// Emits one ACK frame to the group's multicast destination.
    pub async fn send_ack(&self, group_id: GroupId, seq: Seq) {
        let target = {
            let inner = self.inner.read().await;
            inner.groups.get(&group_id)
                .map(|group| (group.ack_socket.clone(), group.endpoint))
        };

        match target {
            Some((socket, endpoint)) => {
                socket.send_packet(SocketAddr::V4(endpoint), &frame::encode_ack(seq)).await;
            }
            None => warn!("not in group {} when sending ACK", group_id),
        }
    }

    /// The receive worker: snapshot the joined sockets, wait bounded for readability, drain
    ///  every socket without blocking, dispatch. The running flag is checked once per pass.
    async fn receive_loop(inner: Arc<RwLock<GroupReceiverInner>>, running: Arc<AtomicBool>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        while running.load(Ordering::SeqCst) {
            let sockets: Vec<(GroupId, Arc<UdpSocket>)> = {
                inner.read().await.groups.iter()
                    .map(|(&group_id, group)| (group_id, group.recv_socket.clone()))
                    .collect()
            };

            if sockets.is_empty() {
                time::sleep(POLL_INTERVAL).await;
                continue;
            }

            let readable = select_all(
                sockets.iter().map(|(_, socket)| Box::pin(socket.readable()))
            );
            match timeout(POLL_INTERVAL, readable).await {
                Err(_elapsed) => continue, // re-check the running flag and the group set
                Ok((Ok(()), _, _)) => {}
                Ok((Err(e), _, _)) => {
                    error!("readability wait failed: {} - exiting receive loop", e);
                    return;
                }
            }

            for (group_id, socket) in &sockets {
                loop {
                    match socket.try_recv_from(&mut buf) {
                        Ok((len, from)) => {
                            trace!("received {} bytes from {:?} on group {}", len, from, group_id);
                            Self::on_datagram(&inner, *group_id, &buf[..len]).await;
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                        Err(e) => {
                            warn!("recv error on group {}: {}", group_id, e);
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn on_datagram(inner: &Arc<RwLock<GroupReceiverInner>>, group_id: GroupId, datagram: &[u8]) {
        // parse and replay bookkeeping under the lock; dispatch and ACK after release
        let (dispatcher, delivery, ack) = {
            let mut guard = inner.write().await;
            let dispatcher = guard.dispatcher.clone();
            let Some(group) = guard.groups.get_mut(&group_id) else {
                return; // left while this pass was draining
            };

            match Frame::parse(datagram, group.mode) {
                None => {
                    debug!("dropping undersized or malformed frame on group {}", group_id);
                    return;
                }
                Some(Frame::Ack(_)) => return, // the client is not an ACK sink
                Some(Frame::Reliable { seq, payload }) => {
                    let fresh = group.replay.observe(seq);
                    if !fresh {
                        debug!("suppressing duplicate seq {} on group {}", seq, group_id);
                    }
                    // ACK every receipt, duplicates included - the previous ACK may have
                    //  been lost
                    let ack = (group.ack_socket.clone(), group.endpoint, seq);
                    (dispatcher, fresh.then(|| payload.to_vec()), Some(ack))
                }
                Some(Frame::Unreliable(payload)) => {
                    (dispatcher, Some(payload.to_vec()), None)
                }
            }
        };

        if let Some(payload) = delivery {
            match &dispatcher {
                Some(dispatcher) => dispatcher.on_message(group_id, &payload).await,
                None => debug!("no dispatcher registered - dropping payload on group {}", group_id),
            }
        }

        if let Some((socket, endpoint, seq)) = ack {
            socket.send_packet(SocketAddr::V4(endpoint), &frame::encode_ack(seq)).await;
        }
    }
}

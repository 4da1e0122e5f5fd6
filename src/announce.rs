use crate::error::MulticastError;
use crate::frame::GroupMode;
use crate::group_receiver::{GroupReceiver, MessageDispatcher};
use crate::ids::GroupId;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const ANNOUNCEMENT_PREFIX: &[u8] = b"MULTICAST:";

/// Delivery seam to the reliable unicast session layer, which is an external collaborator:
///  the multicast plane only needs a byte-string delivery primitive per connection. The
///  handle is a non-owning capability - liveness of the session shows up as the send result.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UnicastSession: Send + Sync + 'static {
    async fn send(&self, msg: &[u8]) -> anyhow::Result<()>;
}

/// The control message by which the server hands a client the coordinates of one group:
///  `MULTICAST:<ipv4-dotted>:<port-decimal>:<group_id-decimal>[:<mode-digit>]`. The fourth
///  field is `1` for a reliable group and absent (or `0`) for best-effort, so the bare
///  three-field form stays valid. Strictly one group per announcement.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Announcement {
    pub addr: Ipv4Addr,
    pub port: u16,
    pub group_id: GroupId,
    pub mode: GroupMode,
}

impl Announcement {
    pub fn compose(&self) -> Vec<u8> {
        let text = match self.mode {
            GroupMode::BestEffort => format!("MULTICAST:{}:{}:{}", self.addr, self.port, self.group_id),
            GroupMode::Reliable => format!("MULTICAST:{}:{}:{}:1", self.addr, self.port, self.group_id),
        };
        text.into_bytes()
    }

    pub fn parse(body: &[u8]) -> Result<Announcement, MulticastError> {
        let text = std::str::from_utf8(body)
            .map_err(|_| MulticastError::MalformedAnnouncement)?;
        let rest = text.strip_prefix("MULTICAST:")
            .ok_or(MulticastError::MalformedAnnouncement)?;

        let mut fields = rest.split(':');
        let addr = fields.next()
            .and_then(|s| s.parse::<Ipv4Addr>().ok())
            .ok_or(MulticastError::MalformedAnnouncement)?;
        let port = fields.next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or(MulticastError::MalformedAnnouncement)?;
        let group_id = fields.next()
            .and_then(|s| s.parse::<u32>().ok())
            .map(GroupId::from_raw)
            .ok_or(MulticastError::MalformedAnnouncement)?;
        let mode = match fields.next() {
            None | Some("0") => GroupMode::BestEffort,
            Some("1") => GroupMode::Reliable,
            Some(_) => return Err(MulticastError::MalformedAnnouncement),
        };
        if fields.next().is_some() {
            return Err(MulticastError::MalformedAnnouncement);
        }

        Ok(Announcement { addr, port, group_id, mode })
    }
}

/// Client half of the announcement hook: feed it every unicast message body. Bodies that do
///  not start with `MULTICAST:` are ignored; malformed announcements are logged and ignored.
///  On the first valid announcement the receiver is created and started; every announced
///  group is joined at most once.
pub struct AnnouncementHandler {
    dispatcher: Arc<dyn MessageDispatcher>,
    receiver: Mutex<Option<Arc<GroupReceiver>>>,
}

impl AnnouncementHandler {
    pub fn new(dispatcher: Arc<dyn MessageDispatcher>) -> AnnouncementHandler {
        AnnouncementHandler {
            dispatcher,
            receiver: Mutex::new(None),
        }
    }

    pub async fn on_unicast_message(&self, body: &[u8]) {
        if !body.starts_with(ANNOUNCEMENT_PREFIX) {
            return;
        }

        let announcement = match Announcement::parse(body) {
            Ok(announcement) => announcement,
            Err(_) => {
                warn!("ignoring malformed announcement");
                return;
            }
        };
        self.join(announcement).await;
    }

    async fn join(&self, announcement: Announcement) {
        let mut slot = self.receiver.lock().await;
        let receiver = match slot.as_ref() {
            Some(receiver) => receiver.clone(),
            None => {
                let receiver = Arc::new(GroupReceiver::new());
                receiver.set_dispatcher(self.dispatcher.clone()).await;
                *slot = Some(receiver.clone());
                receiver
            }
        };

        match receiver
            .join_group(announcement.addr, announcement.port, announcement.group_id, announcement.mode)
            .await
        {
            Ok(()) => {}
            Err(MulticastError::AlreadyJoined(group_id)) => {
                debug!("group {} already joined - ignoring repeated announcement", group_id);
                return;
            }
            Err(e) => {
                warn!("failed to join announced group {}: {}", announcement.group_id, e);
                return;
            }
        }

        match receiver.start().await {
            Ok(()) | Err(MulticastError::AlreadyRunning) => {}
            Err(e) => warn!("failed to start multicast receiver: {}", e),
        }
    }

    /// The receiver driven by announcements, once one arrived.
    pub async fn receiver(&self) -> Option<Arc<GroupReceiver>> {
        self.receiver.lock().await.clone()
    }

    pub async fn stop(&self) {
        let receiver = self.receiver.lock().await.take();
        if let Some(receiver) = receiver {
            receiver.stop().await;
        }
    }
}

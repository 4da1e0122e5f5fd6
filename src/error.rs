use crate::ids::GroupId;
use std::fmt::{Display, Formatter};
use std::io;
use thiserror::Error;

/// Errors surfaced by the public API. Runtime datagram loss is *not* represented here: send
///  errors on the multicast path are logged and swallowed, since losing datagrams is an
///  expected mode of operation on this plane.
#[derive(Debug, Error)]
pub enum MulticastError {
    #[error("no free multicast endpoint after {attempts} attempts")]
    EndpointExhausted { attempts: u32 },

    #[error("multicast socket setup failed at {stage}: {source}")]
    SocketSetup {
        stage: SocketStage,
        #[source]
        source: io::Error,
    },

    #[error("group {0} is already joined")]
    AlreadyJoined(GroupId),

    #[error("receiver is already running")]
    AlreadyRunning,

    #[error("group {0} is not known")]
    NotFound(GroupId),

    #[error("malformed announcement")]
    MalformedAnnouncement,
}

impl MulticastError {
    pub(crate) fn setup(stage: SocketStage) -> impl FnOnce(io::Error) -> MulticastError {
        move |source| MulticastError::SocketSetup { stage, source }
    }
}

/// The socket setup step that failed, distinguishing the failure classes of group creation
///  and group join.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SocketStage {
    Create,
    ReuseAddr,
    Nonblocking,
    Bind,
    Membership,
    Ttl,
    Loopback,
}

impl Display for SocketStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SocketStage::Create => "socket create",
            SocketStage::ReuseAddr => "SO_REUSEADDR",
            SocketStage::Nonblocking => "O_NONBLOCK",
            SocketStage::Bind => "bind",
            SocketStage::Membership => "IP_ADD_MEMBERSHIP",
            SocketStage::Ttl => "IP_MULTICAST_TTL",
            SocketStage::Loopback => "IP_MULTICAST_LOOP",
        };
        write!(f, "{}", s)
    }
}

//! Hybrid reliable-unicast / IP-multicast group messaging.
//!
//! Clients hold a reliable unicast session to a server (external to this crate - any
//!  byte-string delivery primitive will do). The server enrolls clients into *multicast
//!  groups*: it broadcasts a payload to a group with a single datagram to an IPv4 multicast
//!  address, and clients that joined that address receive it directly at the OS level. An
//!  optional *reliable* mode layers per-group sequence numbers, receiver-side ACKs and
//!  sender-side timed retransmission on top of the bare UDP multicast.
//!
//! ## Design goals
//!
//! * Fan-out cost on the server is one `sendto` per message, independent of group size
//!   * the unicast session is only a side channel, used to announce group coordinates
//! * Reliable mode is *at-least-once* per sequence number plus duplicate suppression at the
//!    receiver - not in-order delivery, and not a stream
//!   * the sender re-emits its whole outstanding set on a fixed periodic tick until each
//!      message is acknowledged or its group is deleted; no backoff, no per-message RTO
//!   * receivers ACK every receipt, so a lost ACK is repaired by the next retransmission
//! * Ordering is per-group, per-sequence only; nothing is coordinated across groups
//! * The plane assumes a multicast-capable local network (TTL defaults to 1) and does not
//!    attempt cross-subnet routing, congestion control or membership discovery
//!
//! ## Wire formats
//!
//! All multicast datagrams on a group use one of three shapes. A group is dedicated to one
//!  mode (best-effort or reliable) since the data shapes carry no tag; the `ACK:` prefix
//!  takes precedence over both:
//!
//! ```ascii
//! unreliable data: <payload bytes ...>                      (any length)
//! reliable data:   <seq: u32 BE> <payload bytes ...>        (length >= 4)
//! ACK:             'A' 'C' 'K' ':' <seq, decimal ASCII>     (no terminator)
//! ```
//!
//! Receivers send ACKs to the group's own multicast address; the server observes them by
//!  joining each of its groups on a receive socket of its own.
//!
//! The unicast announcement handing a client the coordinates of one group:
//!
//! ```ascii
//! MULTICAST:<ipv4-dotted>:<port-decimal>:<group_id-decimal>[:<mode-digit>]
//! ```
//!
//! where the optional mode digit is `1` for a reliable group, `0` or absent for best-effort.
//!
//! ## Main types
//!
//! * [`GroupManager`] - the server plane: group creation/teardown, endpoint allocation,
//!   unreliable and reliable fan-out, ACK accounting, retransmission
//! * [`GroupReceiver`] - the client plane: group membership, one multiplexed receive loop,
//!   duplicate suppression, ACK emission, dispatch to a [`MessageDispatcher`]
//! * [`AnnouncementHandler`] - drives a `GroupReceiver` from unicast announcements

pub mod allocator;
pub mod announce;
pub mod config;
pub mod error;
pub mod frame;
pub mod group_manager;
pub mod group_receiver;
pub mod group_socket;
pub mod ids;
pub mod replay;
pub mod send_buffer;

pub use announce::{Announcement, AnnouncementHandler, UnicastSession};
pub use config::MulticastConfig;
pub use error::{MulticastError, SocketStage};
pub use frame::GroupMode;
pub use group_manager::{GroupInfo, GroupManager};
pub use group_receiver::{GroupReceiver, MessageDispatcher};
pub use ids::{GroupId, Seq};

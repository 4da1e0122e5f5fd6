use anyhow::bail;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Configuration of the server-side multicast plane.
pub struct MulticastConfig {
    /// The two leading octets of generated group addresses. The default of `239.255.` keeps
    ///  generated endpoints inside the administratively-scoped range, which is never routed
    ///  off-site. Explicit coordinates passed to `create_group` bypass this.
    pub addr_prefix: [u8; 2],

    /// The UDP port range (inclusive) that generated endpoints are drawn from.
    pub port_range: RangeInclusive<u16>,

    /// Multicast TTL (hop limit) on group send sockets. The default of 1 confines datagrams
    ///  to the local subnet - this plane assumes a multicast-capable local network and does
    ///  not attempt cross-subnet routing.
    pub ttl: u32,

    /// Whether a group's send socket sees its own datagrams looped back locally. Disabled by
    ///  default; single-host test setups need it enabled so a receiver on the same machine
    ///  observes the traffic.
    pub loopback: bool,

    /// Interval of the retransmission tick. Every unacked reliable message is re-emitted once
    ///  per tick until acknowledged or its group is deleted. There is no backoff and no
    ///  per-message RTO.
    pub retransmit_interval: Duration,

    /// How many random `(addr, port)` candidates the allocator tries before giving up with
    ///  `EndpointExhausted`.
    pub max_alloc_attempts: u32,
}

impl Default for MulticastConfig {
    fn default() -> MulticastConfig {
        MulticastConfig {
            addr_prefix: [239, 255],
            port_range: 30000..=40000,
            ttl: 1,
            loopback: false,
            retransmit_interval: Duration::from_millis(500),
            max_alloc_attempts: 64,
        }
    }
}

impl MulticastConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.addr_prefix[0] != 239 {
            bail!("address prefix must stay in the administratively-scoped range 239.0.0.0/8");
        }
        if self.port_range.is_empty() {
            bail!("port range is empty");
        }
        if self.retransmit_interval.is_zero() {
            bail!("retransmit interval must be non-zero");
        }
        if self.max_alloc_attempts == 0 {
            bail!("allocator needs at least one attempt");
        }
        Ok(())
    }
}

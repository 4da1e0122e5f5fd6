use crate::config::MulticastConfig;
use crate::error::MulticastError;
use rand::Rng;
use rustc_hash::FxHashSet;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Draws a random unused `(multicast_addr, port)` pair: the two trailing address octets and
///  the port are generated inside the configured space, re-rolling on collision with a live
///  group. The caller passes the set of endpoints currently in use by this process; there is
///  no coordination with other processes.
///
/// Generic over the RNG so tests can drive it with a seeded one.
pub fn alloc_endpoint(
    rng: &mut impl Rng,
    config: &MulticastConfig,
    in_use: &FxHashSet<SocketAddrV4>,
) -> Result<SocketAddrV4, MulticastError> {
    for _ in 0..config.max_alloc_attempts {
        let addr = Ipv4Addr::new(
            config.addr_prefix[0],
            config.addr_prefix[1],
            rng.gen_range(0..=255),
            rng.gen_range(0..=255),
        );
        let port = rng.gen_range(config.port_range.clone());
        let candidate = SocketAddrV4::new(addr, port);

        if !in_use.contains(&candidate) {
            return Ok(candidate);
        }
    }

    Err(MulticastError::EndpointExhausted { attempts: config.max_alloc_attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_alloc_respects_configured_space() {
        let config = MulticastConfig::default();
        let mut rng = StdRng::seed_from_u64(12);

        for _ in 0..100 {
            let endpoint = alloc_endpoint(&mut rng, &config, &FxHashSet::default()).unwrap();
            let octets = endpoint.ip().octets();
            assert_eq!(octets[0], 239);
            assert_eq!(octets[1], 255);
            assert!(config.port_range.contains(&endpoint.port()));
        }
    }

    #[test]
    fn test_alloc_skips_endpoints_in_use() {
        let config = MulticastConfig::default();

        // pre-compute the first candidates this seed will produce and mark them as taken
        let mut preview = StdRng::seed_from_u64(34);
        let mut in_use = FxHashSet::default();
        for _ in 0..5 {
            in_use.insert(alloc_endpoint(&mut preview, &config, &FxHashSet::default()).unwrap());
        }

        let mut rng = StdRng::seed_from_u64(34);
        let endpoint = alloc_endpoint(&mut rng, &config, &in_use).unwrap();
        assert!(!in_use.contains(&endpoint));
    }

    #[test]
    fn test_alloc_exhaustion() {
        let config = MulticastConfig {
            max_alloc_attempts: 8,
            ..MulticastConfig::default()
        };

        // every candidate the seed can produce within the attempt bound is taken
        let mut preview = StdRng::seed_from_u64(56);
        let mut in_use = FxHashSet::default();
        for _ in 0..8 {
            in_use.insert(alloc_endpoint(&mut preview, &config, &FxHashSet::default()).unwrap());
        }

        let mut rng = StdRng::seed_from_u64(56);
        match alloc_endpoint(&mut rng, &config, &in_use) {
            Err(MulticastError::EndpointExhausted { attempts: 8 }) => {}
            other => panic!("expected EndpointExhausted, got {:?}", other),
        }
    }
}

//! # Server Selection
//!
//! Picks the one server a session is pinned to. Runs once per session, never
//! per request; there is no mid-session failover.

use rand::seq::SliceRandom;
use rand::Rng;

use rcache_common::{CacheError, CacheResult, ServerDescriptor};

/// Uniform random pick from the pool.
pub fn select_server<'a, R>(pool: &'a [ServerDescriptor], rng: &mut R) -> CacheResult<&'a ServerDescriptor>
where
    R: Rng + ?Sized,
{
    let server = pool.choose(rng).ok_or_else(|| {
        CacheError::Configuration("no cache servers defined in configuration".to_string())
    })?;
    tracing::debug!(server = %server, pool_size = pool.len(), "selected cache server");
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pool() -> Vec<ServerDescriptor> {
        vec![
            ServerDescriptor::new("cache-a", 6379),
            ServerDescriptor::new("cache-b", 6379),
            ServerDescriptor::new("cache-c", 6380),
        ]
    }

    #[test]
    fn empty_pool_is_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        let err = select_server(&[], &mut rng).unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn selection_is_always_a_member() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let server = select_server(&pool, &mut rng).unwrap();
            assert!(pool.contains(server));
        }
    }

    #[test]
    fn every_member_can_be_selected() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = [0usize; 3];
        for _ in 0..300 {
            let server = select_server(&pool, &mut rng).unwrap();
            let idx = pool.iter().position(|candidate| candidate == server).unwrap();
            seen[idx] += 1;
        }
        assert!(seen.iter().all(|&count| count > 0), "counts: {seen:?}");
    }

    #[test]
    fn single_member_pool() {
        let pool = vec![ServerDescriptor::new("only", 6379)];
        let mut rng = rand::thread_rng();
        assert_eq!(select_server(&pool, &mut rng).unwrap().host, "only");
    }
}

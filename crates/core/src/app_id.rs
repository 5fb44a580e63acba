//! Application identifier derived from resource identity.

/// 32-bit FNV-1a. Changing the algorithm changes every identifier assigned
/// from then on, so it is fixed.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a32(u32);

impl Fnv1a32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    pub const fn new() -> Self {
        Self(Self::OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 ^= u32::from(*b);
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    pub const fn finish(&self) -> u32 {
        self.0
    }
}

impl Default for Fnv1a32 {
    fn default() -> Self {
        Self::new()
    }
}

/// `"{name}-{hash}"` where hash is FNV-1a over name, namespace and uid in
/// that order, rendered as unsigned decimal.
pub fn compute_app_id(name: &str, namespace: &str, uid: &str) -> String {
    let mut h = Fnv1a32::new();
    h.write(name.as_bytes());
    h.write(namespace.as_bytes());
    h.write(uid.as_bytes());
    format!("{}-{}", name, h.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn fnv1a_vectors() {
        let hash = |s: &str| {
            let mut h = Fnv1a32::new();
            h.write(s.as_bytes());
            h.finish()
        };
        assert_eq!(hash(""), 0x811c_9dc5);
        assert_eq!(hash("a"), 0xe40c_292c);
        assert_eq!(hash("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn known_app_id() {
        assert_eq!(compute_app_id("job1", "default", "abc-123"), "job1-2664345129");
    }

    #[test]
    fn deterministic() {
        let a = compute_app_id("pi", "spark", "1b4e28ba-2fa1-11d2-883f-0016d3cca427");
        let b = compute_app_id("pi", "spark", "1b4e28ba-2fa1-11d2-883f-0016d3cca427");
        assert_eq!(a, b);
        assert!(a.starts_with("pi-"));
    }

    #[test]
    fn fields_are_concatenated_in_order() {
        // Same byte stream, same hash; only the name prefix differs.
        let a = compute_app_id("ab", "c", "d");
        let b = compute_app_id("a", "bc", "d");
        assert_eq!(a.trim_start_matches("ab-"), b.trim_start_matches("a-"));
    }

    #[test]
    fn no_collisions_over_scattered_uids() {
        // Fixed golden-ratio stride so the check is reproducible; a 32-bit
        // hash over truly random uids collides here about 1% of the time.
        let ids: HashSet<String> = (0u128..10_000)
            .map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15_f39c_c060_5ced_c835))
            .map(|x| compute_app_id("job1", "default", &uuid::Uuid::from_u128(x).to_string()))
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn distinct_uids_distinct_ids() {
        let a = compute_app_id("job1", "default", &uuid::Uuid::new_v4().to_string());
        let b = compute_app_id("job1", "default", &uuid::Uuid::new_v4().to_string());
        // Random pair; 2^-32 chance of a false failure.
        assert_ne!(a, b);
    }
}

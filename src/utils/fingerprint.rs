//! Content fingerprints.
//!
//! BLAKE3 truncated to 64 bits. The value is persisted in dedup files, so it
//! must not depend on the platform, the build, or a random seed. A matching
//! fingerprint is only ever a hint; equality is always confirmed on the bytes.

/// 64-bit content fingerprint.
pub type Fingerprint = u64;

/// Fingerprint a byte range.
#[inline]
pub fn fingerprint(data: &[u8]) -> Fingerprint {
    let hash = blake3::hash(data);
    let bytes = hash.as_bytes();
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Fingerprint a large range, hashing on the rayon pool when it pays off.
pub fn fingerprint_large(data: &[u8]) -> Fingerprint {
    const PARALLEL_THRESHOLD: usize = 1 << 20;

    if data.len() < PARALLEL_THRESHOLD {
        return fingerprint(data);
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update_rayon(data);
    let hash = hasher.finalize();
    let bytes = hash.as_bytes();
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

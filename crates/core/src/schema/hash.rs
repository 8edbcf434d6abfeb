//! FNV-1a hash functions
//!
//! Used for type hashes and for content hashes of exported documents.

/// FNV-1a 32-bit hash (compile-time capable)
pub const fn fnv1a_32(data: &[u8]) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
    const FNV_PRIME: u32 = 0x01000193;

    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < data.len() {
        hash ^= data[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// FNV-1a 64-bit hash (compile-time capable)
pub const fn fnv1a_64(data: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001B3;

    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < data.len() {
        hash ^= data[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Hash of a type name
///
/// The derive macro emits this as an associated `TYPE_HASH` const, so it
/// must stay `const`.
pub const fn type_hash(type_name: &str) -> u32 {
    fnv1a_32(type_name.as_bytes())
}

/// Hash a string at runtime
#[inline]
pub fn hash_str(s: &str) -> u32 {
    fnv1a_32(s.as_bytes())
}

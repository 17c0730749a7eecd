//! Hash Registry.
//!
//! Resolves a lowercase algorithm name to a fresh hasher and records
//! whether the algorithm is cryptographically "secure". Built on the
//! RustCrypto `digest` trait family so every secure hasher shares one
//! `Hasher` capability regardless of output width.

use digest::{Digest, Update, VariableOutput};
use std::io::Read;

/// A boxed, type-erased hasher: `write` bytes in, `finish` for the digest.
pub trait Hasher: Send {
    /// Feed more bytes into the hasher.
    fn write(&mut self, bytes: &[u8]);
    /// Consume the hasher and produce the final digest.
    fn finish(self: Box<Self>) -> HashOutput;
}

/// The result of a hash computation: variable-length bytes for
/// cryptographic and wide non-cryptographic digests, or a fixed integer
/// for the 32-bit/64-bit checksum families (§4.D).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOutput {
    /// A byte digest (SHA-2, SHA-3, BLAKE2, MD5, etc).
    Bytes(Vec<u8>),
    /// A 32-bit checksum (CRC32, Adler32, FNV-32 variants).
    U32(u32),
    /// A 64-bit checksum (CRC64 variants, FNV-64 variants).
    U64(u64),
}

impl HashOutput {
    /// The digest as bytes regardless of representation (big-endian for
    /// integer outputs, matching how such checksums are usually printed).
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            HashOutput::Bytes(b) => b.clone(),
            HashOutput::U32(v) => v.to_be_bytes().to_vec(),
            HashOutput::U64(v) => v.to_be_bytes().to_vec(),
        }
    }
}

/// Wraps any fixed-output RustCrypto `Digest` as a [`Hasher`].
struct FixedHasher<D>(D);

impl<D: Digest + Send + 'static> Hasher for FixedHasher<D> {
    fn write(&mut self, bytes: &[u8]) {
        Digest::update(&mut self.0, bytes);
    }

    fn finish(self: Box<Self>) -> HashOutput {
        HashOutput::Bytes(self.0.finalize().to_vec())
    }
}

/// Wraps a variable-output hash (BLAKE2b at a non-default width) as a
/// [`Hasher`], since `VariableOutput` types don't implement `Digest`.
struct VarHasher<D> {
    inner: D,
    output_len: usize,
}

impl<D: Update + VariableOutput + Send + 'static> Hasher for VarHasher<D> {
    fn write(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finish(self: Box<Self>) -> HashOutput {
        let mut out = vec![0u8; self.output_len];
        self.inner
            .finalize_variable(&mut out)
            .expect("output buffer sized to match constructor");
        HashOutput::Bytes(out)
    }
}

struct Crc32Hasher(crc32fast::Hasher);
impl Hasher for Crc32Hasher {
    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
    fn finish(self: Box<Self>) -> HashOutput {
        HashOutput::U32(self.0.finalize())
    }
}

struct CrcU64Hasher {
    algo: &'static crc::Algorithm<u64>,
    buf: Vec<u8>,
}
impl Hasher for CrcU64Hasher {
    fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
    fn finish(self: Box<Self>) -> HashOutput {
        let crc = crc::Crc::<u64>::new(self.algo);
        HashOutput::U64(crc.checksum(&self.buf))
    }
}

struct Adler32Hasher(adler32::RollingAdler32);
impl Hasher for Adler32Hasher {
    fn write(&mut self, bytes: &[u8]) {
        self.0.update_buffer(bytes);
    }
    fn finish(self: Box<Self>) -> HashOutput {
        HashOutput::U32(self.0.hash())
    }
}

struct Fnv32Hasher {
    state: u32,
    prime: bool,
}
impl Hasher for Fnv32Hasher {
    fn write(&mut self, bytes: &[u8]) {
        const FNV_PRIME_32: u32 = 0x0100_0193;
        for &b in bytes {
            if self.prime {
                self.state = self.state.wrapping_mul(FNV_PRIME_32);
                self.state ^= b as u32;
            } else {
                self.state ^= b as u32;
                self.state = self.state.wrapping_mul(FNV_PRIME_32);
            }
        }
    }
    fn finish(self: Box<Self>) -> HashOutput {
        HashOutput::U32(self.state)
    }
}

struct Fnv64Hasher {
    state: u64,
    prime: bool,
}
impl Hasher for Fnv64Hasher {
    fn write(&mut self, bytes: &[u8]) {
        const FNV_PRIME_64: u64 = 0x0000_0100_0000_01B3;
        for &b in bytes {
            if self.prime {
                self.state = self.state.wrapping_mul(FNV_PRIME_64);
                self.state ^= b as u64;
            } else {
                self.state ^= b as u64;
                self.state = self.state.wrapping_mul(FNV_PRIME_64);
            }
        }
    }
    fn finish(self: Box<Self>) -> HashOutput {
        HashOutput::U64(self.state)
    }
}

const SECURE: &[&str] = &[
    "ripemd160",
    "sha224",
    "sha256",
    "sha384",
    "sha512",
    "sha3-224",
    "sha3-256",
    "sha3-384",
    "sha3-512",
    "blake2s-256",
    "blake2b-256",
    "blake2b-384",
    "blake2b-512",
];

const INSECURE: &[&str] = &[
    "md4",
    "md5",
    "sha1",
    "adler32",
    "crc32-ieee",
    "crc64-iso",
    "crc64-ecma",
    "fnv1-32",
    "fnv1-32a",
    "fnv1-64",
    "fnv1-64a",
];

/// Construct a fresh hasher for `algo` (case-sensitive lowercase name).
pub fn new(algo: &str) -> crate::error::Result<Box<dyn Hasher>> {
    use crate::error::{Source, TetError};

    let hasher: Box<dyn Hasher> = match algo {
        "md4" => Box::new(FixedHasher(md4::Md4::new())),
        "md5" => Box::new(FixedHasher(md5::Md5::new())),
        "sha1" => Box::new(FixedHasher(sha1::Sha1::new())),
        "ripemd160" => Box::new(FixedHasher(ripemd::Ripemd160::new())),
        "sha224" => Box::new(FixedHasher(sha2::Sha224::new())),
        "sha256" => Box::new(FixedHasher(sha2::Sha256::new())),
        "sha384" => Box::new(FixedHasher(sha2::Sha384::new())),
        "sha512" => Box::new(FixedHasher(sha2::Sha512::new())),
        "sha3-224" => Box::new(FixedHasher(sha3::Sha3_224::new())),
        "sha3-256" => Box::new(FixedHasher(sha3::Sha3_256::new())),
        "sha3-384" => Box::new(FixedHasher(sha3::Sha3_384::new())),
        "sha3-512" => Box::new(FixedHasher(sha3::Sha3_512::new())),
        "blake2s-256" => Box::new(FixedHasher(blake2::Blake2s256::new())),
        "blake2b-256" => Box::new(VarHasher { inner: blake2::Blake2bVar::new(32).expect("valid output size"), output_len: 32 }),
        "blake2b-384" => Box::new(VarHasher { inner: blake2::Blake2bVar::new(48).expect("valid output size"), output_len: 48 }),
        "blake2b-512" => Box::new(FixedHasher(blake2::Blake2b512::new())),
        "adler32" => Box::new(Adler32Hasher(adler32::RollingAdler32::new())),
        "crc32-ieee" => Box::new(Crc32Hasher(crc32fast::Hasher::new())),
        "crc64-iso" => Box::new(CrcU64Hasher { algo: &crc::CRC_64_GO_ISO, buf: Vec::new() }),
        "crc64-ecma" => Box::new(CrcU64Hasher { algo: &crc::CRC_64_XZ, buf: Vec::new() }),
        "fnv1-32" => Box::new(Fnv32Hasher { state: 0x811c_9dc5, prime: false }),
        "fnv1-32a" => Box::new(Fnv32Hasher { state: 0x811c_9dc5, prime: true }),
        "fnv1-64" => Box::new(Fnv64Hasher { state: 0xcbf2_9ce4_8422_2325, prime: false }),
        "fnv1-64a" => Box::new(Fnv64Hasher { state: 0xcbf2_9ce4_8422_2325, prime: true }),
        other => return Err(TetError::parse(Source::Certificate, UnknownAlgorithm(other.to_string()))),
    };
    Ok(hasher)
}

#[derive(Debug, thiserror::Error)]
#[error("unknown hash algorithm: {0}")]
struct UnknownAlgorithm(String);

/// True if `algo` names a cryptographically secure digest.
pub fn is_secure(algo: &str) -> bool {
    SECURE.contains(&algo)
}

/// All known algorithm names, sorted.
pub fn all() -> Vec<&'static str> {
    let mut v: Vec<&'static str> = SECURE.iter().chain(INSECURE.iter()).copied().collect();
    v.sort_unstable();
    v
}

/// Secure algorithm names, sorted.
pub fn secure() -> Vec<&'static str> {
    let mut v = SECURE.to_vec();
    v.sort_unstable();
    v
}

/// Insecure algorithm names, sorted.
pub fn insecure() -> Vec<&'static str> {
    let mut v = INSECURE.to_vec();
    v.sort_unstable();
    v
}

/// Hash a byte slice in one shot.
pub fn sum(algo: &str, bytes: &[u8]) -> crate::error::Result<HashOutput> {
    let mut h = new(algo)?;
    h.write(bytes);
    Ok(h.finish())
}

/// Hash everything read from `reader`.
pub fn sum_reader(algo: &str, reader: &mut dyn Read) -> crate::error::Result<HashOutput> {
    use crate::error::{Source, TetError};
    let mut h = new(algo)?;
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).map_err(|e| TetError::load(Source::Certificate, e))?;
        if n == 0 {
            break;
        }
        h.write(&buf[..n]);
    }
    Ok(h.finish())
}

/// Hash at most `limit` bytes read from `reader`; any remaining bytes are
/// left unread (the caller chose to bound the input).
pub fn sum_limited_reader(algo: &str, reader: &mut dyn Read, limit: u64) -> crate::error::Result<HashOutput> {
    let mut limited = reader.take(limit);
    sum_reader(algo, &mut limited)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_and_insecure_partition() {
        for a in secure() {
            assert!(is_secure(a), "{a} should be secure");
        }
        for a in insecure() {
            assert!(!is_secure(a), "{a} should not be secure");
        }
    }

    #[test]
    fn all_is_sorted_union() {
        let all = all();
        let mut sorted = all.clone();
        sorted.sort_unstable();
        assert_eq!(all, sorted);
        assert_eq!(all.len(), secure().len() + insecure().len());
    }

    #[test]
    fn sha256_known_vector() {
        let out = sum("sha256", b"abc").unwrap();
        assert_eq!(
            hex::encode(out.as_bytes()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"[..64].to_string()
        );
    }

    #[test]
    fn unknown_algorithm_errors() {
        assert!(new("not-a-real-algo").is_err());
    }

    #[test]
    fn crc32_is_u32_output() {
        let out = sum("crc32-ieee", b"123456789").unwrap();
        assert!(matches!(out, HashOutput::U32(_)));
    }

    #[test]
    fn sum_limited_reader_bounds_input() {
        let data = vec![0xAAu8; 100];
        let mut cursor = std::io::Cursor::new(data);
        let bounded = sum_limited_reader("sha256", &mut cursor, 10).unwrap();
        let mut direct = std::io::Cursor::new(vec![0xAAu8; 10]);
        let expected = sum_reader("sha256", &mut direct).unwrap();
        assert_eq!(bounded, expected);
    }
}

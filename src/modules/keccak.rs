use num_bigint::{BigInt, Sign};
use tiny_keccak::{Hasher, Keccak};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
  let mut hasher = Keccak::v256();
  hasher.update(data);
  let mut out = [0u8; 32];
  hasher.finalize(&mut out);
  out
}

/// Digest read as an unsigned 256-bit integer.
pub fn keccak256_int(data: &[u8]) -> BigInt {
  BigInt::from_bytes_be(Sign::Plus, &keccak256(data))
}

/// `keccak256("")`, the code hash of an account without code.
pub fn empty_code_hash() -> BigInt {
  keccak256_int(&[])
}

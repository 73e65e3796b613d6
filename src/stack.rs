use std::{
  fmt::{self, Debug, Formatter},
  hash::{Hash, Hasher},
};

/// Number of return addresses a signature holds, and the width of the stack
/// field in every exported record.
pub const STACK_DEPTH: usize = 32;

/// Ordered, bounded sequence of raw code addresses identifying the site of a
/// recorded event.
///
/// Signatures are only ever compared and hashed; the addresses are never
/// dereferenced. Two signatures are equal iff they hold the same addresses in
/// the same order.
///
/// Zero terminates the stack field of an exported record, so zero addresses
/// are dropped on construction and never appear inside a signature.
#[derive(Clone, Copy)]
pub struct StackSignature {
  frames: [usize; STACK_DEPTH],
  len: usize,
}

impl StackSignature {
  pub const EMPTY: Self = Self {
    frames: [0; STACK_DEPTH],
    len: 0,
  };

  /// Build a signature from the leading `STACK_DEPTH` non-zero addresses.
  #[must_use]
  pub fn new(addresses: &[usize]) -> Self {
    addresses.iter().copied().collect()
  }

  /// Copy the addresses into a fixed-width record field, zero-padding every
  /// slot past the signature's length.
  pub fn copy_into(&self, out: &mut [usize]) {
    let copied = self.len.min(out.len());
    out[..copied].copy_from_slice(&self.frames[..copied]);
    out[copied..].fill(0);
  }

  #[must_use]
  pub fn frames(&self) -> &[usize] {
    &self.frames[..self.len]
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.len
  }

  /// One-at-a-time style hash over the addresses, seeded by the caller.
  #[must_use]
  pub(crate) fn mix(&self, seed: u64) -> u64 {
    let mut h = seed;
    for &pc in self.frames() {
      h = h.wrapping_add(pc as u64);
      h = h.wrapping_add(h << 10);
      h ^= h >> 6;
    }
    h = h.wrapping_add(h << 3);
    h ^ (h >> 11)
  }
}

impl Default for StackSignature {
  fn default() -> Self {
    Self::EMPTY
  }
}

impl PartialEq for StackSignature {
  fn eq(&self, other: &Self) -> bool {
    self.frames() == other.frames()
  }
}

impl Eq for StackSignature {}

impl Hash for StackSignature {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.frames().hash(state);
  }
}

impl Debug for StackSignature {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.debug_list()
      .entries(self.frames().iter().copied().map(Address))
      .finish()
  }
}

struct Address(usize);

impl Debug for Address {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "{:#x}", self.0)
  }
}

impl From<&[usize]> for StackSignature {
  fn from(addresses: &[usize]) -> Self {
    Self::new(addresses)
  }
}

impl FromIterator<usize> for StackSignature {
  fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
    let mut signature = Self::EMPTY;
    for pc in iter.into_iter().filter(|&pc| pc != 0).take(STACK_DEPTH) {
      signature.frames[signature.len] = pc;
      signature.len += 1;
    }
    signature
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn equality_requires_same_length_and_order() {
    let ab = StackSignature::new(&[0xa, 0xb]);
    assert_eq!(ab, StackSignature::new(&[0xa, 0xb]));
    assert_ne!(ab, StackSignature::new(&[0xb, 0xa]));
    assert_ne!(ab, StackSignature::new(&[0xa, 0xb, 0xc]));
  }

  #[test]
  fn zero_addresses_are_skipped() {
    let signature = StackSignature::new(&[0xa, 0, 0xb, 0]);
    assert_eq!(signature.frames(), &[0xa, 0xb]);
    assert_eq!(signature, StackSignature::new(&[0xa, 0xb]));

    let mut padded = [9usize; 4];
    signature.copy_into(&mut padded);
    assert_eq!(padded, [0xa, 0xb, 0, 0]);
  }

  #[test]
  fn truncates_to_stack_depth() {
    let long: Vec<usize> = (1..=STACK_DEPTH + 8).collect();
    let signature = StackSignature::new(&long);
    assert_eq!(signature.len(), STACK_DEPTH);
    assert_eq!(signature.frames()[STACK_DEPTH - 1], STACK_DEPTH);

    let collected: StackSignature = long.into_iter().collect();
    assert_eq!(collected, signature);
  }

  #[test]
  fn copy_into_zero_pads_and_truncates() {
    let signature = StackSignature::new(&[1, 2, 3]);

    let mut wide = [9usize; 6];
    signature.copy_into(&mut wide);
    assert_eq!(wide, [1, 2, 3, 0, 0, 0]);

    let mut narrow = [9usize; 2];
    signature.copy_into(&mut narrow);
    assert_eq!(narrow, [1, 2]);
  }

  #[test]
  fn mix_depends_on_seed_and_order() {
    let ab = StackSignature::new(&[0x1000, 0x2000]);
    let ba = StackSignature::new(&[0x2000, 0x1000]);
    assert_eq!(ab.mix(0), StackSignature::new(&[0x1000, 0x2000]).mix(0));
    assert_ne!(ab.mix(0), ba.mix(0));
    assert_ne!(ab.mix(0), ab.mix(1));
  }
}

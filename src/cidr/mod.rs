//! IPv4 CIDR arithmetic
//!
//! This module implements the address math underneath allocation: CIDR
//! blocks as inclusive `u32` ranges, minimal aligned covers of arbitrary
//! ranges, and one-sided set difference.
//!
//! # Representation
//!
//! A [`Cidr`] stores the network address and prefix length; the end of the
//! range is derived (`end = start + 2^(32-len) - 1`). Constructors mask the
//! start down to its alignment, so `10.0.0.7/24` normalises to
//! `10.0.0.0/24`.
//!
//! # Difference direction
//!
//! `difference` is deliberately split into [`Cidr::left_difference`]
//! (`a \ b`) so callers always know which side survives. The allocator
//! subtracts reservations from pools with
//! `left_difference(pool, reservation)`.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error types for CIDR parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CidrError {
    /// Not in `a.b.c.d/n` form
    #[error("Invalid CIDR notation: {0}")]
    InvalidNotation(String),

    /// Prefix length outside 0..=32
    #[error("Invalid prefix length: {0}")]
    InvalidPrefixLength(String),
}

/// An aligned IPv4 CIDR block
///
/// Covers the inclusive range `[network, network + 2^(32-prefix_len) - 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    network: u32,
    prefix_len: u8,
}

impl Cidr {
    /// Create a block from an address and prefix length
    ///
    /// The address is masked down to the network address for the given
    /// prefix length, so any host address inside the block is accepted.
    ///
    /// # Panics
    ///
    /// Panics if `prefix_len > 32`.
    #[must_use]
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Self {
        assert!(prefix_len <= 32, "prefix length out of range");
        Self {
            network: u32::from(addr) & prefix_mask(prefix_len),
            prefix_len,
        }
    }

    /// Network (first) address of the block
    #[must_use]
    pub fn first(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    /// Last address of the block
    #[must_use]
    pub fn last(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network | !prefix_mask(self.prefix_len))
    }

    /// Prefix length (0..=32)
    #[must_use]
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Number of addresses in the block (`/32` has exactly 1)
    #[must_use]
    pub fn addresses(&self) -> u64 {
        1u64 << (32 - self.prefix_len)
    }

    /// Inclusive integer range covered by the block
    #[must_use]
    pub fn range(&self) -> (u32, u32) {
        (self.network, self.network | !prefix_mask(self.prefix_len))
    }

    /// Check whether `other` lies entirely inside this block
    #[must_use]
    pub fn contains(&self, other: &Cidr) -> bool {
        let (a0, a1) = self.range();
        let (b0, b1) = other.range();
        a0 <= b0 && b1 <= a1
    }

    /// Check whether a single address lies inside this block
    #[must_use]
    pub fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        let (a0, a1) = self.range();
        let ip = u32::from(addr);
        a0 <= ip && ip <= a1
    }

    /// Check whether the two blocks share any address
    ///
    /// Aligned blocks are either disjoint or nested, so overlapping blocks
    /// always have one containing the other.
    #[must_use]
    pub fn overlaps(&self, other: &Cidr) -> bool {
        let (a0, a1) = self.range();
        let (b0, b1) = other.range();
        a0 <= b1 && b0 <= a1
    }

    /// Cover an arbitrary inclusive range with the minimum set of aligned
    /// blocks
    ///
    /// Greedy: at each step emit the largest block whose start is aligned
    /// and which fits inside the remaining range, then advance past it.
    ///
    /// # Example
    ///
    /// ```
    /// use std::net::Ipv4Addr;
    /// use wg_fleet::cidr::Cidr;
    ///
    /// let blocks = Cidr::from_range(
    ///     Ipv4Addr::new(10, 0, 0, 1),
    ///     Ipv4Addr::new(10, 0, 0, 6),
    /// );
    /// let rendered: Vec<String> = blocks.iter().map(ToString::to_string).collect();
    /// assert_eq!(
    ///     rendered,
    ///     ["10.0.0.1/32", "10.0.0.2/31", "10.0.0.4/31", "10.0.0.6/32"]
    /// );
    /// ```
    #[must_use]
    pub fn from_range(start: Ipv4Addr, end: Ipv4Addr) -> Vec<Cidr> {
        let (mut cursor, end) = (u64::from(u32::from(start)), u64::from(u32::from(end)));
        if cursor > end {
            return Vec::new();
        }

        let mut blocks = Vec::new();
        while cursor <= end {
            let remaining = end - cursor + 1;
            // Host bits are bounded by both the alignment of the cursor and
            // the size of what is left.
            let align_bits = if cursor == 0 {
                32
            } else {
                (cursor as u32).trailing_zeros()
            };
            let size_bits = 63 - remaining.leading_zeros();
            let host_bits = align_bits.min(size_bits).min(32);

            blocks.push(Cidr {
                network: cursor as u32,
                prefix_len: (32 - host_bits) as u8,
            });
            cursor += 1u64 << host_bits;
        }
        blocks
    }

    /// The part of `self` not covered by `other`, as aligned blocks
    ///
    /// Empty when the blocks are identical, when `other` covers `self`, or
    /// when they are disjoint on the side of `other` entirely (disjoint
    /// blocks return `self` unchanged).
    #[must_use]
    pub fn left_difference(&self, other: &Cidr) -> Vec<Cidr> {
        let (a0, a1) = self.range();
        let (b0, b1) = other.range();

        if !self.overlaps(other) {
            return vec![*self];
        }
        if b0 <= a0 && a1 <= b1 {
            return Vec::new();
        }

        let mut out = Vec::new();
        if a0 < b0 {
            out.extend(Cidr::from_range(Ipv4Addr::from(a0), Ipv4Addr::from(b0 - 1)));
        }
        if b1 < a1 {
            out.extend(Cidr::from_range(Ipv4Addr::from(b1 + 1), Ipv4Addr::from(a1)));
        }
        out
    }

    /// The part of `other` not covered by `self`
    #[must_use]
    pub fn right_difference(&self, other: &Cidr) -> Vec<Cidr> {
        other.left_difference(self)
    }
}

/// Netmask for a prefix length (`/0` maps to an all-zero mask)
#[must_use]
pub fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        !0u32 << (32 - prefix_len)
    }
}

/// Prefix length of a contiguous netmask
///
/// An all-ones mask is `/32`; otherwise the length is the number of leading
/// ones, which equals the leading-zero count of the inverted mask.
#[must_use]
pub fn mask_prefix_len(mask: u32) -> u8 {
    (!mask).leading_zeros() as u8
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.first(), self.prefix_len)
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| CidrError::InvalidNotation(s.to_string()))?;

        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| CidrError::InvalidNotation(s.to_string()))?;

        let len: u8 = len
            .parse()
            .map_err(|_| CidrError::InvalidPrefixLength(s.to_string()))?;
        if len > 32 {
            return Err(CidrError::InvalidPrefixLength(s.to_string()));
        }

        Ok(Cidr::new(addr, len))
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

//! # Address Range Model
//!
//! Converts published CIDR blocks (e.g. `104.16.0.0/13`) into the flat list of
//! IPv4 addresses the probing engine works on.
//!
//! Parsing is **permissive**: a malformed block expands to nothing instead of
//! failing, so one bad line in a published list never aborts a run.

use std::net::Ipv4Addr;

use rand::seq::index;
use rayon::prelude::*;
use tracing::debug;

/// A CIDR block as published, e.g. `"173.245.48.0/20"`.
///
/// The addresses are derived on demand and never stored.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AddressRange {
    cidr: String,
}

impl AddressRange {
    pub fn new(cidr: impl Into<String>) -> Self {
        Self { cidr: cidr.into() }
    }

    pub fn cidr(&self) -> &str {
        &self.cidr
    }

    /// Every address covered by the block, in ascending order.
    pub fn addresses(&self) -> Vec<String> {
        expand(&self.cidr)
    }

    /// Number of addresses covered, without materializing them.
    pub fn len(&self) -> u64 {
        parse_block(&self.cidr).map_or(0, |block| block.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Draws up to `amount` distinct addresses from the block at random.
    ///
    /// The draw is returned in ascending order. Asking for more addresses than
    /// the block holds returns the whole block.
    pub fn sample(&self, amount: usize) -> Vec<String> {
        let Some(block) = parse_block(&self.cidr) else {
            return Vec::new();
        };
        let len = usize::try_from(block.len()).unwrap_or(usize::MAX);
        if amount >= len {
            return block.iter().map(|ip| ip.to_string()).collect();
        }

        let mut offsets: Vec<usize> = index::sample(&mut rand::rng(), len, amount).into_vec();
        offsets.sort_unstable();
        offsets
            .into_iter()
            .map(|offset| Ipv4Addr::from(block.network + offset as u32).to_string())
            .collect()
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.cidr)
    }
}

/// Expands a CIDR string into every dotted-quad address it covers.
///
/// Malformed input (wrong component count, non-numeric prefix or octet, prefix
/// above 32) yields an empty list.
pub fn expand(cidr: &str) -> Vec<String> {
    match parse_block(cidr) {
        Some(block) => block.iter().map(|ip| ip.to_string()).collect(),
        None => {
            debug!("Ignoring malformed range {cidr:?}");
            Vec::new()
        }
    }
}

/// Expands many ranges in parallel, keeping the order of `ranges`.
pub fn expand_all(ranges: &[AddressRange]) -> Vec<String> {
    ranges
        .par_iter()
        .flat_map_iter(|range| range.addresses())
        .collect()
}

/// A parsed block, with the host bits of the base address cleared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Block {
    network: u32,
    prefix: u8,
}

impl Block {
    fn mask(&self) -> u32 {
        match self.prefix {
            0 => 0,
            p => u32::MAX << (32 - p),
        }
    }

    fn len(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    fn iter(&self) -> impl Iterator<Item = Ipv4Addr> {
        let last: u32 = self.network | !self.mask();
        (self.network..=last).map(Ipv4Addr::from)
    }
}

fn parse_block(cidr: &str) -> Option<Block> {
    let mut components = cidr.split('/');
    let (Some(base), Some(prefix), None) =
        (components.next(), components.next(), components.next())
    else {
        return None;
    };

    let prefix: u8 = prefix.parse().ok().filter(|p| *p <= 32)?;

    let octets: Vec<u8> = base
        .split('.')
        .map(|octet| octet.parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .ok()?;
    let octets: [u8; 4] = octets.try_into().ok()?;

    let base: u32 = octets
        .iter()
        .enumerate()
        .map(|(i, octet)| u32::from(*octet) << (8 * (3 - i)))
        .sum();

    let mut block = Block { network: base, prefix };
    block.network &= block.mask();
    Some(block)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

use bitvec::prelude::*;
use serde::ser::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Bus values. Bit `i` holds the `2^i` place.
pub type Bits = BitVec<u64, Lsb0>;

/// Builds a bus of `width` bits holding the low bits of `value`.
pub fn word_bits(value: u64, width: usize) -> Bits {
    let mut bits = Bits::repeat(false, width);
    let w = width.min(64);
    if w > 0 {
        bits[..w].store_le::<u64>(value);
    }
    bits
}

/// Renders a bus most significant bit first, the way test vectors are written.
pub fn bit_string(bits: &BitSlice<u64, Lsb0>) -> String {
    bits.iter()
        .rev()
        .map(|b| if *b { '1' } else { '0' })
        .collect()
}

impl<const N: usize> From<[(&str, bool); N]> for BusMap {
    fn from(values: [(&str, bool); N]) -> Self {
        let mut r = BusMap::new();
        for (name, val) in values {
            r.insert(name, word_bits(val as u64, 1));
        }
        r
    }
}

impl<const N: usize> From<[(&str, Bits); N]> for BusMap {
    fn from(values: [(&str, Bits); N]) -> Self {
        let mut r = BusMap::new();
        for (name, val) in values {
            r.insert(name, val);
        }
        r
    }
}

/// `a <= b` holds when every bus in `a` has the same value in `b`.
/// Used to compare expected outputs against a full output vector.
impl PartialOrd for BusMap {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let mut less = true;
        let mut greater = true;

        for k in other.buses.keys() {
            if self.buses.get(k) != other.buses.get(k) {
                greater = false;
            }
        }

        for k in self.buses.keys() {
            if self.buses.get(k) != other.buses.get(k) {
                less = false;
            }
        }

        if less && greater {
            Some(Ordering::Equal)
        } else if less {
            Some(Ordering::Less)
        } else if greater {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl std::fmt::Debug for BusMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let formatted: Vec<(&String, String)> = self
            .buses
            .iter()
            .map(|(key, val)| (key, bit_string(val)))
            .collect();
        write!(f, "{:?}", formatted)
    }
}

impl std::fmt::Display for BusMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = String::new();
        for (name, val) in &self.buses {
            writeln!(&mut s, "{}: {}", name, bit_string(val))?;
        }

        write!(f, "{}", s)
    }
}

impl Serialize for BusMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(
            self.buses
                .iter()
                .map(|(name, val)| (name, bit_string(val))),
        )
    }
}

/// Named bus values: an input vector handed to an instance, or the output
/// vector it produces.
#[derive(Clone, Default, Hash, Eq, PartialEq)]
pub struct BusMap {
    buses: BTreeMap<String, Bits>,
}

impl BusMap {
    pub fn new() -> BusMap {
        BusMap {
            buses: BTreeMap::new(),
        }
    }

    /// Inserts or replaces a bus.
    pub fn insert(&mut self, name: &str, bits: Bits) {
        self.buses.insert(name.to_string(), bits);
    }

    pub fn insert_word(&mut self, name: &str, width: usize, value: u64) {
        self.insert(name, word_bits(value, width));
    }

    pub fn with(mut self, name: &str, width: usize, value: u64) -> BusMap {
        self.insert_word(name, width, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&BitSlice<u64, Lsb0>> {
        self.buses.get(name).map(|b| b.as_bitslice())
    }

    /// Returns the bus as an unsigned number. Buses wider than 64 bits
    /// have no word value.
    pub fn get_word(&self, name: &str) -> Option<u64> {
        let bits = self.buses.get(name)?;
        if bits.len() > 64 {
            return None;
        }
        if bits.is_empty() {
            return Some(0);
        }
        Some(bits.load_le::<u64>())
    }

    pub fn get_width(&self, name: &str) -> Option<usize> {
        self.buses.get(name).map(|x| x.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bits)> {
        self.buses.iter()
    }
}

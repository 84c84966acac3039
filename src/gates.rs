//! The primitive gate library.
//!
//! Every primitive is wired out of a single `nand` function applied bitwise
//! to 16-bit words, so each gate reproduces the Nand derivation bit for bit.
//! Pins are at most 16 bits wide and travel as the low bits of a `u16`.
//! Bits above a pin's width are don't-care and are dropped when the value is
//! stored back into a bus.

use serde::Serialize;

/// Largest number of input pins on any primitive (Mux8Way16).
pub const MAX_PINS: usize = 9;

type PinTable = &'static [(&'static str, usize)];

const IN: PinTable = &[("in", 1)];
const AB: PinTable = &[("a", 1), ("b", 1)];
const OUT: PinTable = &[("out", 1)];
const IN16: PinTable = &[("in", 16)];
const AB16: PinTable = &[("a", 16), ("b", 16)];
const OUT16: PinTable = &[("out", 16)];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Primitive {
    Nand,
    Not,
    And,
    Or,
    Xor,
    Mux,
    DMux,
    Not16,
    And16,
    Or16,
    Mux16,
    Or8Way,
    Mux4Way16,
    Mux8Way16,
    DMux4Way,
    DMux8Way,
    HalfAdder,
    FullAdder,
    Add16,
    Inc16,
    DFF,
    Bit,
    Register,
}

impl Primitive {
    pub const ALL: [Primitive; 23] = [
        Primitive::Nand,
        Primitive::Not,
        Primitive::And,
        Primitive::Or,
        Primitive::Xor,
        Primitive::Mux,
        Primitive::DMux,
        Primitive::Not16,
        Primitive::And16,
        Primitive::Or16,
        Primitive::Mux16,
        Primitive::Or8Way,
        Primitive::Mux4Way16,
        Primitive::Mux8Way16,
        Primitive::DMux4Way,
        Primitive::DMux8Way,
        Primitive::HalfAdder,
        Primitive::FullAdder,
        Primitive::Add16,
        Primitive::Inc16,
        Primitive::DFF,
        Primitive::Bit,
        Primitive::Register,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Nand => "Nand",
            Primitive::Not => "Not",
            Primitive::And => "And",
            Primitive::Or => "Or",
            Primitive::Xor => "Xor",
            Primitive::Mux => "Mux",
            Primitive::DMux => "DMux",
            Primitive::Not16 => "Not16",
            Primitive::And16 => "And16",
            Primitive::Or16 => "Or16",
            Primitive::Mux16 => "Mux16",
            Primitive::Or8Way => "Or8Way",
            Primitive::Mux4Way16 => "Mux4Way16",
            Primitive::Mux8Way16 => "Mux8Way16",
            Primitive::DMux4Way => "DMux4Way",
            Primitive::DMux8Way => "DMux8Way",
            Primitive::HalfAdder => "HalfAdder",
            Primitive::FullAdder => "FullAdder",
            Primitive::Add16 => "Add16",
            Primitive::Inc16 => "Inc16",
            Primitive::DFF => "DFF",
            Primitive::Bit => "Bit",
            Primitive::Register => "Register",
        }
    }

    pub fn from_name(name: &str) -> Option<Primitive> {
        Primitive::ALL.iter().copied().find(|p| p.name() == name)
    }

    pub fn inputs(self) -> PinTable {
        match self {
            Primitive::Nand | Primitive::And | Primitive::Or | Primitive::Xor => AB,
            Primitive::Not | Primitive::DFF => IN,
            Primitive::Mux => &[("a", 1), ("b", 1), ("sel", 1)],
            Primitive::DMux => &[("in", 1), ("sel", 1)],
            Primitive::Not16 | Primitive::Inc16 => IN16,
            Primitive::And16 | Primitive::Or16 | Primitive::Add16 => AB16,
            Primitive::Mux16 => &[("a", 16), ("b", 16), ("sel", 1)],
            Primitive::Or8Way => &[("in", 8)],
            Primitive::Mux4Way16 => &[("a", 16), ("b", 16), ("c", 16), ("d", 16), ("sel", 2)],
            Primitive::Mux8Way16 => &[
                ("a", 16),
                ("b", 16),
                ("c", 16),
                ("d", 16),
                ("e", 16),
                ("f", 16),
                ("g", 16),
                ("h", 16),
                ("sel", 3),
            ],
            Primitive::DMux4Way => &[("in", 1), ("sel", 2)],
            Primitive::DMux8Way => &[("in", 1), ("sel", 3)],
            Primitive::HalfAdder => AB,
            Primitive::FullAdder => &[("a", 1), ("b", 1), ("c", 1)],
            Primitive::Bit => &[("in", 1), ("load", 1)],
            Primitive::Register => &[("in", 16), ("load", 1)],
        }
    }

    pub fn outputs(self) -> PinTable {
        match self {
            Primitive::DMux => AB,
            Primitive::DMux4Way => &[("a", 1), ("b", 1), ("c", 1), ("d", 1)],
            Primitive::DMux8Way => &[
                ("a", 1),
                ("b", 1),
                ("c", 1),
                ("d", 1),
                ("e", 1),
                ("f", 1),
                ("g", 1),
                ("h", 1),
            ],
            Primitive::HalfAdder | Primitive::FullAdder => &[("sum", 1), ("carry", 1)],
            Primitive::Not16
            | Primitive::And16
            | Primitive::Or16
            | Primitive::Mux16
            | Primitive::Mux4Way16
            | Primitive::Mux8Way16
            | Primitive::Add16
            | Primitive::Inc16
            | Primitive::Register => OUT16,
            _ => OUT,
        }
    }

    /// Sequential primitives present their stored state on `out` and only
    /// change it on a clock edge.
    pub fn is_sequential(self) -> bool {
        matches!(self, Primitive::DFF | Primitive::Bit | Primitive::Register)
    }

    /// Computes the outputs of a combinational primitive. `ins` and `outs`
    /// follow the order of `inputs()` and `outputs()`. Sequential primitives
    /// leave `outs` untouched.
    pub fn eval(self, ins: &[u16], outs: &mut [u16]) {
        match self {
            Primitive::Nand => outs[0] = nand(ins[0], ins[1]),
            Primitive::Not | Primitive::Not16 => outs[0] = not(ins[0]),
            Primitive::And | Primitive::And16 => outs[0] = and(ins[0], ins[1]),
            Primitive::Or | Primitive::Or16 => outs[0] = or(ins[0], ins[1]),
            Primitive::Xor => outs[0] = xor(ins[0], ins[1]),
            Primitive::Mux | Primitive::Mux16 => outs[0] = mux(ins[0], ins[1], fan_out(ins[2], 0)),
            Primitive::DMux => {
                let (a, b) = dmux(ins[0], fan_out(ins[1], 0));
                outs[0] = a;
                outs[1] = b;
            }
            Primitive::Or8Way => outs[0] = or8way(ins[0]),
            Primitive::Mux4Way16 => outs[0] = mux4way16(&ins[..4], ins[4]),
            Primitive::Mux8Way16 => outs[0] = mux8way16(&ins[..8], ins[8]),
            Primitive::DMux4Way => outs[..4].copy_from_slice(&dmux4way(ins[0], ins[1])),
            Primitive::DMux8Way => outs[..8].copy_from_slice(&dmux8way(ins[0], ins[1])),
            Primitive::HalfAdder => {
                let (sum, carry) = half_adder(ins[0], ins[1]);
                outs[0] = sum;
                outs[1] = carry;
            }
            Primitive::FullAdder => {
                let (sum, carry) = full_adder(ins[0], ins[1], ins[2]);
                outs[0] = sum;
                outs[1] = carry;
            }
            Primitive::Add16 => outs[0] = add16(ins[0], ins[1]),
            Primitive::Inc16 => outs[0] = add16(ins[0], 1),
            Primitive::DFF | Primitive::Bit | Primitive::Register => {}
        }
    }

    /// State after a clock edge, given the inputs sampled during settling.
    /// Combinational primitives hold `prev`.
    pub fn next_state(self, ins: &[u16], prev: u16) -> u16 {
        let next = match self {
            Primitive::DFF => ins[0],
            Primitive::Bit | Primitive::Register => mux(prev, ins[0], fan_out(ins[1], 0)),
            _ => prev,
        };
        next & (u16::MAX >> (16 - self.outputs()[0].1))
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn nand(a: u16, b: u16) -> u16 {
    !(a & b)
}

fn not(a: u16) -> u16 {
    nand(a, a)
}

fn and(a: u16, b: u16) -> u16 {
    not(nand(a, b))
}

fn or(a: u16, b: u16) -> u16 {
    nand(not(a), not(b))
}

fn xor(a: u16, b: u16) -> u16 {
    let n = nand(a, b);
    nand(nand(a, n), nand(b, n))
}

// Wires bit `i` of `word` to all 16 lines.
fn fan_out(word: u16, i: usize) -> u16 {
    if (word >> i) & 1 == 1 {
        u16::MAX
    } else {
        0
    }
}

fn mux(a: u16, b: u16, sel: u16) -> u16 {
    or(and(a, not(sel)), and(b, sel))
}

fn dmux(x: u16, sel: u16) -> (u16, u16) {
    (and(x, not(sel)), and(x, sel))
}

fn or8way(x: u16) -> u16 {
    let mut out = x;
    for i in 1..8 {
        out = or(out, x >> i);
    }
    out & 1
}

fn mux4way16(ins: &[u16], sel: u16) -> u16 {
    let s0 = fan_out(sel, 0);
    mux(mux(ins[0], ins[1], s0), mux(ins[2], ins[3], s0), fan_out(sel, 1))
}

fn mux8way16(ins: &[u16], sel: u16) -> u16 {
    mux(
        mux4way16(&ins[..4], sel),
        mux4way16(&ins[4..8], sel),
        fan_out(sel, 2),
    )
}

fn dmux4way(x: u16, sel: u16) -> [u16; 4] {
    let s0 = fan_out(sel, 0);
    let (low, high) = dmux(x, fan_out(sel, 1));
    let (a, b) = dmux(low, s0);
    let (c, d) = dmux(high, s0);
    [a, b, c, d]
}

fn dmux8way(x: u16, sel: u16) -> [u16; 8] {
    let (low, high) = dmux(x, fan_out(sel, 2));
    let [a, b, c, d] = dmux4way(low, sel);
    let [e, f, g, h] = dmux4way(high, sel);
    [a, b, c, d, e, f, g, h]
}

fn half_adder(a: u16, b: u16) -> (u16, u16) {
    (xor(a, b), and(a, b))
}

fn full_adder(a: u16, b: u16, c: u16) -> (u16, u16) {
    let (partial, c1) = half_adder(a, b);
    let (sum, c2) = half_adder(partial, c);
    (sum, or(c1, c2))
}

// Ripple carry through sixteen full adders. The final carry is dropped.
fn add16(a: u16, b: u16) -> u16 {
    let mut out = 0;
    let mut carry = 0;
    for i in 0..16 {
        let (sum, c) = full_adder(a >> i, b >> i, carry);
        out |= (sum & 1) << i;
        carry = c & 1;
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use more_asserts::assert_le;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn eval1(p: Primitive, ins: &[u16]) -> Vec<u16> {
        let mut outs = [0u16; 8];
        p.eval(ins, &mut outs);
        outs[..p.outputs().len()].to_vec()
    }

    #[test]
    fn test_pin_tables() {
        for p in Primitive::ALL {
            assert_eq!(Primitive::from_name(p.name()), Some(p));
            assert_le!(p.inputs().len(), MAX_PINS);
            assert_le!(p.outputs().len(), 8);
            for (_, width) in p.inputs().iter().chain(p.outputs()) {
                assert_le!(*width, 16);
            }
        }
        assert_eq!(Primitive::from_name("nand"), None);
    }

    #[test]
    fn test_two_input_truth_tables() {
        for a in 0..2u16 {
            for b in 0..2u16 {
                let (x, y) = (a == 1, b == 1);
                assert_eq!(eval1(Primitive::Nand, &[a, b])[0] & 1, !(x && y) as u16);
                assert_eq!(eval1(Primitive::And, &[a, b])[0] & 1, (x && y) as u16);
                assert_eq!(eval1(Primitive::Or, &[a, b])[0] & 1, (x || y) as u16);
                assert_eq!(eval1(Primitive::Xor, &[a, b])[0] & 1, (x ^ y) as u16);
                let ha = eval1(Primitive::HalfAdder, &[a, b]);
                assert_eq!((ha[0] & 1) + 2 * (ha[1] & 1), a + b);
            }
            assert_eq!(eval1(Primitive::Not, &[a])[0] & 1, 1 - a);
        }
    }

    #[test]
    fn test_three_input_truth_tables() {
        for row in 0..8u16 {
            let (a, b, c) = (row & 1, (row >> 1) & 1, (row >> 2) & 1);
            let mux = eval1(Primitive::Mux, &[a, b, c])[0] & 1;
            assert_eq!(mux, if c == 1 { b } else { a });

            let fa = eval1(Primitive::FullAdder, &[a, b, c]);
            assert_eq!((fa[0] & 1) + 2 * (fa[1] & 1), a + b + c);
        }

        for row in 0..4u16 {
            let (x, sel) = (row & 1, (row >> 1) & 1);
            let outs = eval1(Primitive::DMux, &[x, sel]);
            assert_eq!(outs[0] & 1, if sel == 0 { x } else { 0 });
            assert_eq!(outs[1] & 1, if sel == 1 { x } else { 0 });
        }
    }

    #[test]
    fn test_wide_demultiplexers() {
        for sel in 0..8u16 {
            let outs = eval1(Primitive::DMux8Way, &[1, sel]);
            for (i, out) in outs.iter().enumerate() {
                assert_eq!(out & 1, (i as u16 == sel) as u16);
            }
            let outs = eval1(Primitive::DMux8Way, &[0, sel]);
            assert!(outs.iter().all(|o| o & 1 == 0));
        }
        for sel in 0..4u16 {
            let outs = eval1(Primitive::DMux4Way, &[1, sel]);
            for (i, out) in outs.iter().enumerate() {
                assert_eq!(out & 1, (i as u16 == sel) as u16);
            }
        }
    }

    #[test]
    fn test_sampled_sixteen_bit() {
        let mut rng = StdRng::seed_from_u64(16);
        for _ in 0..256 {
            let a: u16 = rng.gen();
            let b: u16 = rng.gen();
            assert_eq!(eval1(Primitive::Add16, &[a, b])[0], a.wrapping_add(b));
            assert_eq!(eval1(Primitive::Inc16, &[a])[0], a.wrapping_add(1));
            assert_eq!(eval1(Primitive::And16, &[a, b])[0], a & b);
            assert_eq!(eval1(Primitive::Or16, &[a, b])[0], a | b);
            assert_eq!(eval1(Primitive::Not16, &[a])[0], !a);
            assert_eq!(eval1(Primitive::Mux16, &[a, b, 0])[0], a);
            assert_eq!(eval1(Primitive::Mux16, &[a, b, 1])[0], b);

            let words: Vec<u16> = (0..8).map(|_| rng.gen()).collect();
            let sel = rng.gen_range(0..8u16);
            let mut ins = words.clone();
            ins.push(sel);
            assert_eq!(eval1(Primitive::Mux8Way16, &ins)[0], words[sel as usize]);

            let mut ins = words[..4].to_vec();
            ins.push(sel & 3);
            assert_eq!(eval1(Primitive::Mux4Way16, &ins)[0], words[(sel & 3) as usize]);

            let byte = a & 0xFF;
            assert_eq!(eval1(Primitive::Or8Way, &[byte])[0], (byte != 0) as u16);
        }
    }

    #[test]
    fn test_add16_wraps() {
        assert_eq!(add16(0xFFFF, 1), 0);
        assert_eq!(add16(0x7FFF, 1), 0x8000);
        assert_eq!(add16(5, 0xFFFF), 4);
    }

    #[test]
    fn test_register_next_state() {
        assert_eq!(Primitive::Register.next_state(&[0x1234, 0], 0x0042), 0x0042);
        assert_eq!(Primitive::Register.next_state(&[0x1234, 1], 0x0042), 0x1234);
        assert_eq!(Primitive::Bit.next_state(&[1, 1], 0), 1);
        assert_eq!(Primitive::Bit.next_state(&[0, 0], 1), 1);
        assert_eq!(Primitive::DFF.next_state(&[1], 0), 1);
        assert_eq!(Primitive::DFF.next_state(&[0], 1), 0);
        assert!(Primitive::Register.is_sequential());
        assert!(!Primitive::Add16.is_sequential());
    }
}

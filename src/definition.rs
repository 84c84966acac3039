//! Chip definitions: the structured form a chip is loaded from.
//!
//! A definition names its pins and lists part instances. Each part binds its
//! formal pins to signals, chip pins or boolean literals through connection
//! expressions such as `sel=address[6..8]` or `b[0]=inc`.

use crate::error::SimError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Inclusive bit range `lo..hi`, as written in connection expressions.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BitRange {
    pub lo: usize,
    pub hi: usize,
}

impl BitRange {
    pub fn new(lo: usize, hi: usize) -> Result<BitRange, SimError> {
        if lo > hi {
            return Err(SimError::configuration(format!(
                "Bit range {}..{} is reversed.",
                lo, hi
            )));
        }
        Ok(BitRange { lo, hi })
    }

    pub fn width(&self) -> usize {
        self.hi - self.lo + 1
    }

    /// Convert inclusive range to exclusive Range in Rust
    pub fn to_range(&self) -> Range<usize> {
        self.lo..self.hi + 1
    }
}

impl fmt::Display for BitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lo == self.hi {
            write!(f, "[{}]", self.lo)
        } else {
            write!(f, "[{}..{}]", self.lo, self.hi)
        }
    }
}

/// A pin or signal name with an optional slice.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PinRef {
    pub name: String,
    pub range: Option<BitRange>,
}

impl PinRef {
    /// Width of the reference once the full width of `name` is known.
    pub fn width_within(&self, full_width: usize) -> usize {
        self.range.map(|r| r.width()).unwrap_or(full_width)
    }

    /// Checks that the slice fits inside a bus of `full_width` bits.
    pub fn check_within(&self, full_width: usize) -> Result<(), SimError> {
        if let Some(r) = self.range {
            if r.hi >= full_width {
                return Err(SimError::configuration(format!(
                    "Range {}{} is outside of the declared bus width {}.",
                    self.name, r, full_width
                )));
            }
        }
        Ok(())
    }

    /// Offset of the first referenced bit.
    pub fn lo(&self) -> usize {
        self.range.map(|r| r.lo).unwrap_or(0)
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.range {
            Some(r) => write!(f, "{}{}", self.name, r),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The right hand side of a connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Actual {
    Wire(PinRef),
    Literal(bool),
}

impl fmt::Display for Actual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actual::Wire(w) => write!(f, "{}", w),
            Actual::Literal(v) => write!(f, "{}", v),
        }
    }
}

//  Not(in=sel, out=notSel) has two bindings: { formal: in, actual: sel }
//  and { formal: out, actual: notSel }.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Binding {
    pub formal: PinRef,
    pub actual: Actual,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.formal, self.actual)
    }
}

impl From<Binding> for String {
    fn from(b: Binding) -> Self {
        b.to_string()
    }
}

impl TryFrom<String> for Binding {
    type Error = SimError;

    fn try_from(s: String) -> Result<Self, SimError> {
        s.parse()
    }
}

impl FromStr for Binding {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, SimError> {
        let malformed = |why: &str| {
            SimError::configuration(format!("Malformed connection `{}`: {}", s, why))
        };

        let (left, right) = s
            .split_once('=')
            .ok_or_else(|| malformed("expected `pin=signal`"))?;
        let formal = parse_pin_ref(left.trim()).map_err(|e| malformed(&e))?;
        let right = right.trim();
        let actual = match right {
            "true" => Actual::Literal(true),
            "false" => Actual::Literal(false),
            _ => Actual::Wire(parse_pin_ref(right).map_err(|e| malformed(&e))?),
        };

        Ok(Binding { formal, actual })
    }
}

fn parse_pin_ref(s: &str) -> Result<PinRef, String> {
    let (name, range) = match s.split_once('[') {
        None => (s, None),
        Some((name, rest)) => {
            let inner = rest
                .strip_suffix(']')
                .ok_or_else(|| String::from("missing `]`"))?;
            let (lo, hi) = match inner.split_once("..") {
                Some((lo, hi)) => (lo, hi),
                None => (inner, inner),
            };
            let number = |t: &str| {
                t.trim()
                    .parse::<usize>()
                    .map_err(|_| format!("`{}` is not a bit index", t.trim()))
            };
            let range = BitRange::new(number(lo)?, number(hi)?).map_err(|e| e.msg)?;
            (name.trim(), Some(range))
        }
    };

    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(format!("`{}` is not a pin name", name));
    }

    Ok(PinRef {
        name: String::from(name),
        range,
    })
}

fn default_width() -> usize {
    1
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PinDecl {
    pub name: String,
    #[serde(default = "default_width")]
    pub width: usize,
}

impl fmt::Display for PinDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width == 1 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.width)
        }
    }
}

/// One use of a primitive or another chip inside a definition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PartInstance {
    pub chip: String,
    pub bindings: Vec<Binding>,
}

impl fmt::Display for PartInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.chip)?;
        for (i, binding) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", binding)?;
        }
        write!(f, ");")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChipDefinition {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<PinDecl>,
    #[serde(default)]
    pub outputs: Vec<PinDecl>,
    #[serde(default)]
    pub parts: Vec<PartInstance>,
    /// Direct wiring `dest=src` inside the chip, without a part in between.
    #[serde(default)]
    pub assignments: Vec<Binding>,
}

impl ChipDefinition {
    pub fn new(name: &str) -> ChipDefinition {
        ChipDefinition {
            name: String::from(name),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parts: Vec::new(),
            assignments: Vec::new(),
        }
    }

    pub fn input(mut self, name: &str, width: usize) -> ChipDefinition {
        self.inputs.push(PinDecl {
            name: String::from(name),
            width,
        });
        self
    }

    pub fn output(mut self, name: &str, width: usize) -> ChipDefinition {
        self.outputs.push(PinDecl {
            name: String::from(name),
            width,
        });
        self
    }

    pub fn part(mut self, chip: &str, bindings: &[&str]) -> Result<ChipDefinition, SimError> {
        let bindings = bindings
            .iter()
            .map(|b| b.parse())
            .collect::<Result<Vec<Binding>, SimError>>()?;
        self.parts.push(PartInstance {
            chip: String::from(chip),
            bindings,
        });
        Ok(self)
    }

    pub fn assign(mut self, assignment: &str) -> Result<ChipDefinition, SimError> {
        self.assignments.push(assignment.parse()?);
        Ok(self)
    }

    pub fn from_json(s: &str) -> Result<ChipDefinition, SimError> {
        serde_json::from_str(s).map_err(|e| {
            SimError::configuration(format!("Unable to read chip definition: {}", e))
        })
    }
}

impl fmt::Display for ChipDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CHIP {} {{", self.name)?;

        let list = |pins: &[PinDecl]| {
            pins.iter()
                .map(|p| p.to_string())
                .collect::<Vec<String>>()
                .join(", ")
        };
        writeln!(f, "    IN {};", list(&self.inputs))?;
        writeln!(f, "    OUT {};", list(&self.outputs))?;
        writeln!(f, "    PARTS:")?;

        for part in &self.parts {
            writeln!(f, "    {}", part)?;
        }
        for assignment in &self.assignments {
            writeln!(f, "    {} <= {};", assignment.formal, assignment.actual)?;
        }

        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_sliced_binding() {
        let b: Binding = "sel=address[6..8]".parse().unwrap();
        assert_eq!(b.formal.name, "sel");
        assert_eq!(b.formal.range, None);
        assert_eq!(
            b.actual,
            Actual::Wire(PinRef {
                name: String::from("address"),
                range: Some(BitRange { lo: 6, hi: 8 }),
            })
        );
    }

    #[test]
    fn test_parse_single_bit_and_literal() {
        let b: Binding = " b[0] = inc ".parse().unwrap();
        assert_eq!(b.formal.range, Some(BitRange { lo: 0, hi: 0 }));
        assert_eq!(b.to_string(), "b[0]=inc");

        let b: Binding = "b[1..15]=false".parse().unwrap();
        assert_eq!(b.formal.range.unwrap().width(), 15);
        assert_eq!(b.actual, Actual::Literal(false));
    }

    #[test]
    fn test_parse_malformed() {
        for s in ["in", "=x", "a[3..1]=x", "a[x]=y", "a=b[2", "a=9b", "a b=c"] {
            let e = s.parse::<Binding>().unwrap_err();
            assert_eq!(e.kind, ErrorKind::Configuration, "{}", s);
        }
    }

    #[test]
    fn test_check_within() {
        let r = parse_pin_ref("address[6..8]").unwrap();
        assert!(r.check_within(9).is_ok());
        assert!(r.check_within(8).is_err());
        assert_eq!(r.width_within(9), 3);
        assert_eq!(parse_pin_ref("a").unwrap().width_within(16), 16);
    }

    #[test]
    fn test_definition_json() {
        let def = ChipDefinition::from_json(
            r#"{
                "name": "Buffer",
                "inputs": [{"name": "in", "width": 4}],
                "outputs": [{"name": "out", "width": 4}, {"name": "low"}],
                "parts": [{"chip": "Not16", "bindings": ["in[0..3]=in", "in[4..15]=false", "out[0]=low"]}],
                "assignments": ["out=in"]
            }"#,
        )
        .unwrap();
        assert_eq!(def.outputs[1].width, 1);
        assert_eq!(def.parts[0].bindings.len(), 3);
        assert_eq!(def.assignments[0].to_string(), "out=in");

        let bad = ChipDefinition::from_json(r#"{"name": "X", "parts": [{"chip": "Not", "bindings": ["in"]}]}"#);
        assert_eq!(bad.unwrap_err().kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_display() {
        let def = ChipDefinition::new("And")
            .input("a", 1)
            .input("b", 1)
            .output("out", 1)
            .part("Nand", &["a=a", "b=b", "out=n"])
            .unwrap()
            .part("Nand", &["a=n", "b=n", "out=out"])
            .unwrap();
        let s = def.to_string();
        assert!(s.starts_with("CHIP And {"));
        assert!(s.contains("IN a, b;"));
        assert!(s.contains("Nand(a=n, b=n, out=out);"));
    }
}

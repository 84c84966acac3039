//! Test scripts.
//!
//! A script names a chip and lists steps. Each step sets some input pins,
//! settles the chip (or ticks it, for clocked scripts) and compares the named
//! output pins. Inputs persist from one step to the next, so a step only
//! lists the pins that change.

use crate::busmap::{word_bits, BusMap, Bits};
use crate::error::{ErrorKind, SimError, TransformedError};
use crate::library::ChipLibrary;
use crate::resolver::PinSlot;
use crate::simulator::Instance;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::Path;

/// A pin value as written in a script: a number, or a string with a number
/// system prefix (`%B`/`0b` binary, `%X`/`0x` hex, `%D` decimal).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum TestValue {
    Number(i64),
    Text(String),
}

impl TestValue {
    /// Converts the value to a bus of `width` bits. Negative numbers are
    /// stored in two's complement.
    pub fn to_bits(&self, width: usize) -> Result<Bits, SimError> {
        let text = match self {
            TestValue::Number(n) => return signed_bits(*n, width, &n.to_string()),
            TestValue::Text(t) => t.trim(),
        };
        let bad = || SimError::configuration(format!("`{}` is not a valid test value.", text));

        if let Some(digits) = text.strip_prefix("%B").or_else(|| text.strip_prefix("0b")) {
            if digits.is_empty() {
                return Err(bad());
            }
            if digits.len() > width {
                return Err(SimError::configuration(format!(
                    "`{}` has more than {} bits.",
                    text, width
                )));
            }
            let mut bits = Bits::with_capacity(width);
            for c in digits.chars().rev() {
                match c {
                    '0' => bits.push(false),
                    '1' => bits.push(true),
                    _ => return Err(bad()),
                }
            }
            bits.resize(width, false);
            Ok(bits)
        } else if let Some(digits) = text.strip_prefix("%X").or_else(|| text.strip_prefix("0x")) {
            let value = u64::from_str_radix(digits, 16).map_err(|_| bad())?;
            if width < 64 && value >> width != 0 {
                return Err(out_of_range(text, width));
            }
            Ok(word_bits(value, width))
        } else {
            let digits = text.strip_prefix("%D").unwrap_or(text);
            let value: i64 = digits.parse().map_err(|_| bad())?;
            signed_bits(value, width, text)
        }
    }
}

fn out_of_range(text: &str, width: usize) -> SimError {
    SimError::configuration(format!("{} does not fit in {} bits.", text, width))
}

fn signed_bits(value: i64, width: usize, text: &str) -> Result<Bits, SimError> {
    if width < 64 {
        let fits = if value < 0 {
            width > 0 && value >= -(1i64 << (width - 1))
        } else {
            (value as u64) >> width == 0
        };
        if !fits {
            return Err(out_of_range(text, width));
        }
    }
    Ok(word_bits(value as u64, width))
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TestStep {
    #[serde(default)]
    pub inputs: BTreeMap<String, TestValue>,
    #[serde(default)]
    pub expected: BTreeMap<String, TestValue>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TestScript {
    pub chip: String,
    /// Ticks the clock on every step instead of only settling.
    #[serde(default)]
    pub clocked: bool,
    pub steps: Vec<TestStep>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TestOutcome {
    Passed {
        steps: usize,
    },
    /// The first step whose outputs differ. `step` counts from zero.
    Mismatch {
        step: usize,
        expected: BusMap,
        actual: BusMap,
    },
}

fn pin_values(
    values: &BTreeMap<String, TestValue>,
    pins: &[PinSlot],
    chip: &str,
    direction: &str,
) -> Result<BusMap, SimError> {
    let mut map = BusMap::new();
    for (name, value) in values {
        let pin = pins.iter().find(|p| &p.name == name).ok_or_else(|| {
            SimError::unresolved(format!("Chip {} has no {} pin {}.", chip, direction, name))
        })?;
        map.insert(name, value.to_bits(pin.width)?);
    }
    Ok(map)
}

/// Runs a script against a fresh instance of its chip, stopping at the first
/// mismatch.
pub fn run_script(library: &ChipLibrary, script: &TestScript) -> Result<TestOutcome, SimError> {
    let mut instance = Instance::construct(library, &script.chip)?;
    let plan = library.plan(&script.chip)?;

    for (idx, step) in script.steps.iter().enumerate() {
        let inputs = pin_values(&step.inputs, &plan.inputs, &plan.name, "input")?;
        let expected = pin_values(&step.expected, &plan.outputs, &plan.name, "output")?;
        let actual = if script.clocked {
            instance.tick(&inputs)?
        } else {
            instance.eval_combinational(&inputs)?
        };

        if !(expected <= actual) {
            tracing::info!(chip = %script.chip, step = idx + 1, "mismatch");
            return Ok(TestOutcome::Mismatch {
                step: idx,
                expected,
                actual,
            });
        }
    }

    tracing::info!(chip = %script.chip, steps = script.steps.len(), "script passed");
    Ok(TestOutcome::Passed {
        steps: script.steps.len(),
    })
}

pub fn parse_test(test_script_path: &Path) -> Result<TestScript, Box<dyn Error>> {
    let contents = fs::read_to_string(test_script_path).map_err(|e| TransformedError {
        msg: format!("Unable to read test script {}", test_script_path.display()),
        kind: ErrorKind::IOError,
        source: Some(Box::new(e)),
    })?;
    let script = serde_json::from_str(&contents).map_err(|e| TransformedError {
        msg: format!("Malformed test script {}", test_script_path.display()),
        kind: ErrorKind::Configuration,
        source: Some(Box::new(e)),
    })?;
    Ok(script)
}

/// Runs a test script file and prints the result.
pub fn run_test(test_script_path: &Path, library: &ChipLibrary) -> Result<TestOutcome, Box<dyn Error>> {
    let script = parse_test(test_script_path)?;
    let outcome = run_script(library, &script)?;

    match &outcome {
        TestOutcome::Passed { steps } => {
            println!("✔️️️    {} tests passed.", steps);
        }
        TestOutcome::Mismatch {
            step,
            expected,
            actual,
        } => {
            println!("❌ Step: {}", step + 1);
            println!("Expected: {}", expected);
            println!("Actual: {}", actual);
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    fn construct_path(path: &str) -> PathBuf {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.join("resources").join("tests").join(path)
    }

    fn text(s: &str) -> TestValue {
        TestValue::Text(String::from(s))
    }

    #[test]
    fn test_value_number_systems() {
        assert_eq!(text("%B101").to_bits(4).unwrap(), word_bits(0b0101, 4));
        assert_eq!(text("0b1").to_bits(1).unwrap(), word_bits(1, 1));
        assert_eq!(text("%X1F").to_bits(16).unwrap(), word_bits(0x1F, 16));
        assert_eq!(text("0xffff").to_bits(16).unwrap(), word_bits(0xFFFF, 16));
        assert_eq!(text("%D12").to_bits(16).unwrap(), word_bits(12, 16));
        assert_eq!(text("12").to_bits(16).unwrap(), word_bits(12, 16));
        assert_eq!(text("%D-1").to_bits(4).unwrap(), word_bits(0xF, 4));
        assert_eq!(TestValue::Number(-2).to_bits(16).unwrap(), word_bits(0xFFFE, 16));
        assert_eq!(TestValue::Number(255).to_bits(8).unwrap(), word_bits(255, 8));
    }

    #[test]
    fn test_value_errors() {
        for (value, width) in [
            (text("%B10101"), 4),
            (text("%B12"), 4),
            (text("0x"), 4),
            (text("0x10"), 4),
            (text("seven"), 4),
            (TestValue::Number(16), 4),
            (TestValue::Number(-9), 4),
        ] {
            let e = value.to_bits(width).unwrap_err();
            assert_eq!(e.kind, ErrorKind::Configuration, "{:?}", value);
        }
    }

    #[test]
    fn test_script_json() {
        let script: TestScript = serde_json::from_str(
            r#"{"chip": "And", "steps": [{"inputs": {"a": 1, "b": "%B1"}, "expected": {"out": 1}}]}"#,
        )
        .unwrap();
        assert!(!script.clocked);
        assert_eq!(script.steps[0].inputs["b"], text("%B1"));
        assert_eq!(
            run_script(&ChipLibrary::new(), &script).unwrap(),
            TestOutcome::Passed { steps: 1 }
        );
    }

    #[test]
    fn test_resource_scripts() {
        let library = ChipLibrary::standard();
        for (file, steps) in [("Xor.json", 4), ("PC.json", 9), ("RAM8.json", 6)] {
            let outcome = run_test(&construct_path(file), &library).unwrap();
            assert_eq!(outcome, TestOutcome::Passed { steps }, "{}", file);
        }
    }

    #[test]
    fn test_mismatch_reports_first_step() {
        let script = TestScript {
            chip: String::from("Or"),
            clocked: false,
            steps: vec![
                TestStep {
                    inputs: BTreeMap::from([
                        (String::from("a"), TestValue::Number(0)),
                        (String::from("b"), TestValue::Number(0)),
                    ]),
                    expected: BTreeMap::from([(String::from("out"), TestValue::Number(0))]),
                },
                TestStep {
                    inputs: BTreeMap::from([(String::from("b"), TestValue::Number(1))]),
                    expected: BTreeMap::from([(String::from("out"), TestValue::Number(0))]),
                },
                TestStep {
                    inputs: BTreeMap::new(),
                    expected: BTreeMap::from([(String::from("out"), TestValue::Number(0))]),
                },
            ],
        };
        match run_script(&ChipLibrary::new(), &script).unwrap() {
            TestOutcome::Mismatch {
                step,
                expected,
                actual,
            } => {
                assert_eq!(step, 1);
                assert_eq!(expected.get_word("out"), Some(0));
                assert_eq!(actual.get_word("out"), Some(1));
            }
            other => panic!("expected a mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_pin() {
        let script: TestScript = serde_json::from_str(
            r#"{"chip": "Not", "steps": [{"inputs": {"x": 1}, "expected": {"out": 0}}]}"#,
        )
        .unwrap();
        let e = run_script(&ChipLibrary::new(), &script).unwrap_err();
        assert_eq!(e.kind, ErrorKind::UnresolvedReference);
    }

    #[test]
    fn test_bad_script_files() {
        let dir = tempfile::tempdir().unwrap();
        let library = ChipLibrary::standard();
        assert!(run_test(&dir.path().join("missing.json"), &library).is_err());

        let path = dir.path().join("broken.json");
        fs::write(&path, r#"{"chip": "Not", "steps": [}"#).unwrap();
        assert!(parse_test(&path).is_err());

        let path = dir.path().join("unknown.json");
        fs::write(&path, r#"{"chip": "Frobnicator", "steps": []}"#).unwrap();
        assert!(run_test(&path, &library).is_err());
    }
}

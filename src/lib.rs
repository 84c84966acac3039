pub mod binding;
pub mod busmap;
pub mod definition;
pub mod error;
pub mod gates;
pub mod harness;
pub mod library;
pub mod resolver;
pub mod simulator;

pub use crate::busmap::{Bits, BusMap};
pub use crate::definition::ChipDefinition;
pub use crate::error::{ErrorKind, SimError};
pub use crate::harness::{run_script, run_test, TestOutcome, TestScript};
pub use crate::library::ChipLibrary;
pub use crate::simulator::Instance;

use crate::busmap::{bit_string, word_bits};
use crate::harness::TestValue;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;

use wasm_bindgen::prelude::*;

/// Inputs and outputs of a chip for a set of input vectors. Every value is a
/// bit string, most significant bit first.
#[derive(Serialize, Debug)]
pub struct TruthTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Whether the rows cover every input combination. Wide chips get a
    /// random sample instead.
    pub exhaustive: bool,
}

/// Builds the truth table of a chip by settling it once per row. Inputs are
/// enumerated with the first pin in the highest bits, as long as that takes
/// at most `max_rows` rows.
pub fn truth_table(library: &ChipLibrary, chip: &str, max_rows: usize) -> Result<TruthTable, SimError> {
    let mut instance = Instance::construct(library, chip)?;
    let plan = library.plan(chip)?;

    let columns: Vec<String> = plan
        .inputs
        .iter()
        .chain(&plan.outputs)
        .map(|p| p.name.clone())
        .collect();
    let total_width: usize = plan.inputs.iter().map(|p| p.width).sum();
    let exhaustive = total_width < 64 && (1u64 << total_width) <= max_rows as u64;

    let mut vectors = Vec::new();
    if exhaustive {
        for n in 0..1u64 << total_width {
            let mut inputs = BusMap::new();
            let mut shift = 0;
            for pin in plan.inputs.iter().rev() {
                inputs.insert(&pin.name, word_bits(n >> shift, pin.width));
                shift += pin.width;
            }
            vectors.push(inputs);
        }
    } else {
        tracing::warn!(
            chip,
            total_width,
            max_rows,
            "too many input combinations, sampling rows at random"
        );
        let mut rng = rand::thread_rng();
        for _ in 0..max_rows {
            let mut inputs = BusMap::new();
            for pin in &plan.inputs {
                let bits: Bits = (0..pin.width).map(|_| rng.gen::<bool>()).collect();
                inputs.insert(&pin.name, bits);
            }
            vectors.push(inputs);
        }
    }

    let mut rows = Vec::with_capacity(vectors.len());
    for inputs in vectors {
        let outputs = instance.eval_combinational(&inputs)?;
        let row: Vec<String> = columns
            .iter()
            .map(|c| {
                inputs
                    .get(c)
                    .or_else(|| outputs.get(c))
                    .map(bit_string)
                    .unwrap_or_default()
            })
            .collect();
        rows.push(row);
    }

    Ok(TruthTable {
        columns,
        rows,
        exhaustive,
    })
}

fn load_definition(library: &ChipLibrary, definition: &str) -> Result<String, SimError> {
    let definition = ChipDefinition::from_json(definition)?;
    let name = definition.name.clone();
    library.add(definition)?;
    Ok(name)
}

/// Settles a chip given as JSON on one input vector. Inputs map pin names to
/// test values; the outputs come back as bit strings.
pub fn simulate_internal(definition: &str, inputs: &str) -> Result<BusMap, Box<dyn Error>> {
    let library = ChipLibrary::standard();
    let name = load_definition(&library, definition)?;
    let mut instance = Instance::construct(&library, &name)?;

    let values: BTreeMap<String, TestValue> = serde_json::from_str(inputs)?;
    let mut vector = BusMap::new();
    for (pin, value) in &values {
        let width = instance
            .plan()
            .input(pin)
            .map(|p| p.width)
            .ok_or_else(|| SimError::unresolved(format!("Chip {} has no input pin {}.", name, pin)))?;
        vector.insert(pin, value.to_bits(width)?);
    }
    Ok(instance.eval_combinational(&vector)?)
}

pub fn full_table_internal(definition: &str) -> Result<TruthTable, SimError> {
    let library = ChipLibrary::standard();
    let name = load_definition(&library, definition)?;
    truth_table(&library, &name, 1024)
}

#[wasm_bindgen]
pub fn simulate(definition: &str, inputs: &str) -> Result<String, JsValue> {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    let outputs = simulate_internal(definition, inputs).map_err(|e| JsValue::from(e.to_string()))?;
    serde_json::to_string(&outputs).map_err(|e| JsValue::from(e.to_string()))
}

#[wasm_bindgen]
pub fn full_table(definition: &str) -> Result<String, JsValue> {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    let table = full_table_internal(definition).map_err(|e| JsValue::from(e.to_string()))?;
    serde_json::to_string(&table).map_err(|e| JsValue::from(e.to_string()))
}

#[cfg(test)]
mod libtest {
    use super::*;

    const HALF_ADDER: &str = r#"{
        "name": "MyHalfAdder",
        "inputs": [{"name": "a"}, {"name": "b"}],
        "outputs": [{"name": "sum"}, {"name": "carry"}],
        "parts": [
            {"chip": "Xor", "bindings": ["a=a", "b=b", "out=sum"]},
            {"chip": "And", "bindings": ["a=a", "b=b", "out=carry"]}
        ]
    }"#;

    #[test]
    fn test_truth_table_exhaustive() {
        let table = full_table_internal(HALF_ADDER).unwrap();
        assert!(table.exhaustive);
        assert_eq!(table.columns, vec!["a", "b", "sum", "carry"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["0", "0", "0", "0"],
                vec!["0", "1", "1", "0"],
                vec!["1", "0", "1", "0"],
                vec!["1", "1", "0", "1"],
            ]
        );
    }

    #[test]
    fn test_truth_table_bus_order() {
        let table = truth_table(&ChipLibrary::new(), "DMux4Way", 1024).unwrap();
        assert_eq!(table.rows.len(), 8);
        assert_eq!(table.rows[5], vec!["1", "01", "0", "1", "0", "0"]);
    }

    #[test]
    fn test_truth_table_sampled() {
        let table = truth_table(&ChipLibrary::new(), "Add16", 32).unwrap();
        assert!(!table.exhaustive);
        assert_eq!(table.rows.len(), 32);
        for row in &table.rows {
            let a = u16::from_str_radix(&row[0], 2).unwrap();
            let b = u16::from_str_radix(&row[1], 2).unwrap();
            let out = u16::from_str_radix(&row[2], 2).unwrap();
            assert_eq!(a.wrapping_add(b), out);
        }
    }

    #[test]
    fn test_simulate_internal() {
        let outputs = simulate_internal(HALF_ADDER, r#"{"a": 1, "b": "%B1"}"#).unwrap();
        assert_eq!(serde_json::to_string(&outputs).unwrap(), r#"{"carry":"1","sum":"0"}"#);

        assert!(simulate_internal(HALF_ADDER, r#"{"c": 1}"#).is_err());
        assert!(simulate_internal(r#"{"name": "Not"}"#, "{}").is_err());
    }
}

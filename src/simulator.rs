use std::rc::Rc;

use bitvec::prelude::*;

use crate::busmap::{BusMap, Bits};
use crate::error::SimError;
use crate::gates::MAX_PINS;
use crate::library::ChipLibrary;
use crate::resolver::{Plan, Terminal, Transfer};

/// A running copy of a chip. Holds the current value of every signal bit
/// and the stored state of each sequential primitive. Instances of the same
/// chip share one plan and never share state.
pub struct Instance {
    plan: Rc<Plan>,
    values: Bits,
    state: Vec<u16>,
    next_state: Vec<u16>,
}

impl Instance {
    pub fn new(plan: Rc<Plan>) -> Instance {
        let mut instance = Instance {
            values: plan.initial.clone(),
            state: vec![0; plan.sequential.len()],
            next_state: vec![0; plan.sequential.len()],
            plan,
        };
        instance.publish_state();
        instance
    }

    /// Builds a fresh instance of the named chip, with all state zeroed.
    pub fn construct(library: &ChipLibrary, name: &str) -> Result<Instance, SimError> {
        Ok(Instance::new(library.plan(name)?))
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Settles the combinational logic for `inputs` without a clock edge.
    /// Pins missing from `inputs` keep their previous values.
    pub fn eval_combinational(&mut self, inputs: &BusMap) -> Result<BusMap, SimError> {
        self.apply(inputs)?;
        self.settle();
        Ok(self.outputs())
    }

    /// One clock cycle: settle on `inputs`, move every sequential primitive
    /// to its next state, then settle again. Returns the outputs after the
    /// edge.
    pub fn tick(&mut self, inputs: &BusMap) -> Result<BusMap, SimError> {
        self.apply(inputs)?;
        self.settle();
        self.clock_edge();
        self.settle();
        tracing::trace!(chip = %self.plan.name, "tick");
        Ok(self.outputs())
    }

    /// Zeroes all state and signals.
    pub fn reset(&mut self) {
        self.values.copy_from_bitslice(&self.plan.initial);
        self.state.fill(0);
        self.publish_state();
    }

    /// Current value of any signal, by hierarchical name such as `load` or
    /// `RAM8#2/load`.
    pub fn read_signal(&self, name: &str) -> Option<Bits> {
        let terminals = self.plan.probes.get(name)?;
        let mut bits = Bits::with_capacity(terminals.len());
        for t in terminals {
            bits.push(match t {
                Terminal::Slot(s) => self.values[*s],
                Terminal::Const(v) => *v,
            });
        }
        Some(bits)
    }

    pub fn outputs(&self) -> BusMap {
        let mut r = BusMap::new();
        for pin in &self.plan.outputs {
            r.insert(&pin.name, self.values[pin.slot..pin.slot + pin.width].to_bitvec());
        }
        r
    }

    fn apply(&mut self, inputs: &BusMap) -> Result<(), SimError> {
        // Check everything first so a bad vector leaves the instance untouched.
        for (name, bits) in inputs.iter() {
            let pin = self.plan.input(name).ok_or_else(|| {
                SimError::unresolved(format!(
                    "Chip {} has no input pin {}.",
                    self.plan.name, name
                ))
            })?;
            if bits.len() != pin.width {
                return Err(SimError::configuration(format!(
                    "Input {} of chip {} is {} bits wide, got {} bits.",
                    name,
                    self.plan.name,
                    pin.width,
                    bits.len()
                )));
            }
        }

        let plan = Rc::clone(&self.plan);
        for (name, bits) in inputs.iter() {
            if let Some(pin) = plan.input(name) {
                self.values[pin.slot..pin.slot + pin.width].copy_from_bitslice(bits);
            }
        }
        Ok(())
    }

    fn settle(&mut self) {
        let plan = Rc::clone(&self.plan);
        let mut ins = [0u16; MAX_PINS];
        let mut outs = [0u16; MAX_PINS];

        for &i in &plan.order {
            let op = &plan.ops[i];
            transfer(&mut self.values, &op.copies);
            let pins = op.primitive.inputs();
            for (k, ((_, width), lo)) in pins.iter().zip(&op.inputs).enumerate() {
                ins[k] = load(&self.values, *lo, *width);
            }
            op.primitive.eval(&ins[..pins.len()], &mut outs);
            for (k, ((_, width), lo)) in op.primitive.outputs().iter().zip(&op.outputs).enumerate() {
                self.values[*lo..lo + width].store_le(outs[k]);
            }
        }

        transfer(&mut self.values, &plan.output_copies);
    }

    fn clock_edge(&mut self) {
        let plan = Rc::clone(&self.plan);
        let mut ins = [0u16; MAX_PINS];

        for (k, &i) in plan.sequential.iter().enumerate() {
            let op = &plan.ops[i];
            transfer(&mut self.values, &op.copies);
            let pins = op.primitive.inputs();
            for (p, ((_, width), lo)) in pins.iter().zip(&op.inputs).enumerate() {
                ins[p] = load(&self.values, *lo, *width);
            }
            self.next_state[k] = op.primitive.next_state(&ins[..pins.len()], self.state[k]);
        }

        std::mem::swap(&mut self.state, &mut self.next_state);
        self.publish_state();
    }

    // Presents the stored state on the outputs of sequential primitives.
    fn publish_state(&mut self) {
        let plan = Rc::clone(&self.plan);
        for (k, &i) in plan.sequential.iter().enumerate() {
            let op = &plan.ops[i];
            let width = op.primitive.outputs()[0].1;
            let lo = op.outputs[0];
            self.values[lo..lo + width].store_le(self.state[k]);
        }
    }
}

fn transfer(values: &mut Bits, copies: &[Transfer]) {
    for c in copies {
        values.copy_within(c.src..c.src + c.width, c.dst);
    }
}

fn load(values: &BitSlice<u64, Lsb0>, lo: usize, width: usize) -> u16 {
    values[lo..lo + width].load_le::<u16>()
}

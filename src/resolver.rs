//! Chip graph resolver.
//!
//! Flattens a resolved chip and every chip nested in it into one arena of
//! signal bits and a list of primitive operations. Bindings, assignments and
//! chip boundaries disappear: each operation input is copied straight from
//! the slot of the primitive output (or chip input) that drives it, and
//! constants are preset once. Combinational operations are then put in
//! topological order. Sequential primitives break the order, since their
//! outputs only change on a clock edge.

use crate::binding::{PartKind, ResolvedChip, ResolvedPart, Segment, Signal, SignalRole, Source, Tap};
use crate::busmap::{BusMap, Bits};
use crate::error::SimError;
use crate::gates::Primitive;
use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Graph;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// A run of bits moved from one arena range to another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub src: usize,
    pub dst: usize,
    pub width: usize,
}

/// Where a signal bit finally comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terminal {
    Slot(usize),
    Const(bool),
}

/// One primitive in the flattened chip.
#[derive(Clone, Debug)]
pub struct Op {
    pub primitive: Primitive,
    /// Hierarchical part path, e.g. `RAM64#3/RAM8#1/Register#4`.
    pub path: String,
    /// First arena slot of each input pin.
    pub inputs: Vec<usize>,
    /// First arena slot of each output pin.
    pub outputs: Vec<usize>,
    /// Copies that load the input pins, run before evaluation.
    pub copies: Vec<Transfer>,
    /// Index into the instance state, for sequential primitives.
    pub state: Option<usize>,
}

/// A top-level pin and its place in the arena.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PinSlot {
    pub name: String,
    pub width: usize,
    pub slot: usize,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct Dependency {
    /// The edge crosses a sequential primitive and does not constrain
    /// combinational order.
    pub sequential: bool,
}

/// The evaluation plan of a chip, shared by every instance of it.
#[derive(Debug)]
pub struct Plan {
    pub name: String,
    pub inputs: Vec<PinSlot>,
    pub outputs: Vec<PinSlot>,
    pub slots: usize,
    /// Arena contents before any evaluation, with constants in place.
    pub initial: Bits,
    pub ops: Vec<Op>,
    /// Combinational ops in dependency order.
    pub order: Vec<usize>,
    pub sequential: Vec<usize>,
    pub output_copies: Vec<Transfer>,
    /// Every signal of every nested chip, by hierarchical name.
    pub probes: BTreeMap<String, Vec<Terminal>>,
    /// Producer to consumer dependencies between ops.
    pub graph: Graph<String, Dependency>,
}

#[derive(Clone, Copy, Debug)]
enum Net {
    Open,
    Slot(usize),
    Const(bool),
    Alias(usize),
}

#[derive(Default)]
struct Flattener {
    nets: Vec<Net>,
    slots: usize,
    ops: Vec<Op>,
    // (op, net, destination slot) for each op input bit.
    reads: Vec<(usize, usize, usize)>,
    // (name, first net, width) for each signal.
    signals: Vec<(String, usize, usize)>,
}

impl Flattener {
    fn alloc_nets(&mut self, width: usize) -> usize {
        let base = self.nets.len();
        self.nets.resize(base + width, Net::Open);
        base
    }

    fn alloc_slots(&mut self, width: usize) -> usize {
        let base = self.slots;
        self.slots += width;
        base
    }

    fn source_net(&mut self, src: Source, bases: &[usize], bit: usize) -> usize {
        match src {
            Source::Signal { signal, lo } => bases[signal] + lo + bit,
            Source::Const(v) => {
                self.nets.push(Net::Const(v));
                self.nets.len() - 1
            }
        }
    }

    fn feed(&mut self, segments: &[Segment], bases: &[usize], mut sink: impl FnMut(&mut Flattener, usize, usize)) {
        for seg in segments {
            for k in 0..seg.width {
                let net = self.source_net(seg.src, bases, k);
                sink(self, seg.dst_lo + k, net);
            }
        }
    }

    /// Allocates nets for every signal of `chip` and wires up its parts.
    /// Returns the first net of each signal.
    fn instantiate(&mut self, chip: &ResolvedChip, prefix: &str) -> Vec<usize> {
        let bases: Vec<usize> = chip
            .signals
            .iter()
            .map(|s| self.alloc_nets(s.width))
            .collect();
        for (s, &base) in chip.signals.iter().zip(&bases) {
            self.signals
                .push((format!("{}{}", prefix, s.name), base, s.width));
        }

        for part in &chip.parts {
            match &part.kind {
                PartKind::Primitive(p) => self.add_op(*p, part, prefix, &bases),
                PartKind::Chip(child) => {
                    let child_prefix = format!("{}{}/", prefix, part.label);
                    let child_bases = self.instantiate(child, &child_prefix);
                    for (pin, segments) in part.feeds.iter().enumerate() {
                        let pin_base = child_bases[pin];
                        self.feed(segments, &bases, |f, bit, net| {
                            f.nets[pin_base + bit] = Net::Alias(net);
                        });
                    }
                    for tap in &part.taps {
                        let from = child_bases[child.input_count + tap.pin] + tap.src_lo;
                        self.link_tap(tap, &bases, |k| Net::Alias(from + k));
                    }
                }
            }
        }

        for link in &chip.links {
            for k in 0..link.width {
                let net = self.source_net(link.src, &bases, k);
                self.nets[bases[link.signal] + link.dst_lo + k] = Net::Alias(net);
            }
        }
        bases
    }

    fn add_op(&mut self, primitive: Primitive, part: &ResolvedPart, prefix: &str, bases: &[usize]) {
        let op = self.ops.len();
        let inputs: Vec<usize> = primitive
            .inputs()
            .iter()
            .map(|(_, w)| self.alloc_slots(*w))
            .collect();
        let outputs: Vec<usize> = primitive
            .outputs()
            .iter()
            .map(|(_, w)| self.alloc_slots(*w))
            .collect();

        for (pin, segments) in part.feeds.iter().enumerate() {
            let pin_base = inputs[pin];
            self.feed(segments, bases, |f, bit, net| {
                f.reads.push((op, net, pin_base + bit));
            });
        }
        for tap in &part.taps {
            let from = outputs[tap.pin] + tap.src_lo;
            self.link_tap(tap, bases, |k| Net::Slot(from + k));
        }

        self.ops.push(Op {
            primitive,
            path: format!("{}{}", prefix, part.label),
            inputs,
            outputs,
            copies: Vec::new(),
            state: None,
        });
    }

    fn link_tap(&mut self, tap: &Tap, bases: &[usize], net: impl Fn(usize) -> Net) {
        for k in 0..tap.width {
            self.nets[bases[tap.signal] + tap.dst_lo + k] = net(k);
        }
    }

    fn net_name(&self, net: usize) -> String {
        for (name, base, width) in &self.signals {
            if (*base..base + width).contains(&net) {
                return if *width == 1 {
                    name.clone()
                } else {
                    format!("{}[{}]", name, net - base)
                };
            }
        }
        String::from("constant")
    }

    /// Follows aliases down to a slot or constant.
    fn terminal(&self, net: usize) -> Result<Terminal, SimError> {
        let mut n = net;
        let mut hops = 0;
        loop {
            match self.nets[n] {
                Net::Slot(s) => return Ok(Terminal::Slot(s)),
                Net::Const(v) => return Ok(Terminal::Const(v)),
                Net::Open => {
                    return Err(SimError::configuration(format!(
                        "{} is not driven.",
                        self.net_name(net)
                    )))
                }
                Net::Alias(next) => {
                    hops += 1;
                    if hops > self.nets.len() {
                        return Err(SimError::cyclic(format!(
                            "Combinational cycle through direct connections of {}.",
                            self.net_name(net)
                        )));
                    }
                    n = next;
                }
            }
        }
    }
}

/// Joins copies of neighboring bits into ranges.
fn merge_copies(mut copies: Vec<Transfer>) -> Vec<Transfer> {
    copies.sort_by_key(|c| c.dst);
    let mut merged: Vec<Transfer> = Vec::with_capacity(copies.len());
    for c in copies {
        match merged.last_mut() {
            Some(prev) if prev.src + prev.width == c.src && prev.dst + prev.width == c.dst => {
                prev.width += c.width;
            }
            _ => merged.push(c),
        }
    }
    merged
}

impl Plan {
    pub fn build(chip: &ResolvedChip) -> Result<Plan, SimError> {
        let mut f = Flattener::default();
        let bases = f.instantiate(chip, "");

        let mut inputs = Vec::new();
        for (i, s) in chip.inputs().iter().enumerate() {
            let slot = f.alloc_slots(s.width);
            for k in 0..s.width {
                f.nets[bases[i] + k] = Net::Slot(slot + k);
            }
            inputs.push(PinSlot {
                name: s.name.clone(),
                width: s.width,
                slot,
            });
        }
        let outputs: Vec<PinSlot> = chip
            .outputs()
            .iter()
            .map(|s| PinSlot {
                name: s.name.clone(),
                width: s.width,
                slot: f.alloc_slots(s.width),
            })
            .collect();

        let mut initial = Bits::repeat(false, f.slots);
        let mut op_copies: Vec<Vec<Transfer>> = vec![Vec::new(); f.ops.len()];
        for &(op, net, dst) in &f.reads {
            match f.terminal(net)? {
                Terminal::Slot(src) => op_copies[op].push(Transfer { src, dst, width: 1 }),
                Terminal::Const(v) => initial.set(dst, v),
            }
        }

        let mut output_copies = Vec::new();
        for (i, pin) in outputs.iter().enumerate() {
            let base = bases[chip.input_count + i];
            for k in 0..pin.width {
                match f.terminal(base + k)? {
                    Terminal::Slot(src) => output_copies.push(Transfer {
                        src,
                        dst: pin.slot + k,
                        width: 1,
                    }),
                    Terminal::Const(v) => initial.set(pin.slot + k, v),
                }
            }
        }

        let mut probes = BTreeMap::new();
        for (name, base, width) in &f.signals {
            let mut bits = Vec::with_capacity(*width);
            for k in 0..*width {
                bits.push(match f.terminal(base + k) {
                    Ok(t) => t,
                    Err(e) if e.kind == crate::error::ErrorKind::CyclicCombinational => return Err(e),
                    Err(_) => Terminal::Const(false),
                });
            }
            probes.insert(name.clone(), bits);
        }

        let mut ops = std::mem::take(&mut f.ops);
        let mut sequential = Vec::new();
        for (i, (op, copies)) in ops.iter_mut().zip(op_copies).enumerate() {
            op.copies = merge_copies(copies);
            if op.primitive.is_sequential() {
                op.state = Some(sequential.len());
                sequential.push(i);
            }
        }

        let graph = dependency_graph(&ops, f.slots);
        let order = combinational_order(&ops, &graph)?;

        let plan = Plan {
            name: chip.name.clone(),
            inputs,
            outputs,
            slots: f.slots,
            initial,
            ops,
            order,
            sequential,
            output_copies: merge_copies(output_copies),
            probes,
            graph,
        };
        tracing::debug!(
            chip = %plan.name,
            ops = plan.ops.len(),
            slots = plan.slots,
            "flattened chip"
        );
        Ok(plan)
    }

    /// A plan evaluating a single primitive, pins named as the primitive's.
    pub fn for_primitive(primitive: Primitive) -> Result<Plan, SimError> {
        let signal = |(name, width): &(&str, usize), role| Signal {
            name: String::from(*name),
            width: *width,
            role,
        };
        let mut signals: Vec<Signal> = primitive
            .inputs()
            .iter()
            .map(|p| signal(p, SignalRole::Input))
            .collect();
        let input_count = signals.len();
        signals.extend(primitive.outputs().iter().map(|p| signal(p, SignalRole::Output)));

        let feeds = primitive
            .inputs()
            .iter()
            .enumerate()
            .map(|(i, (_, width))| {
                vec![Segment {
                    dst_lo: 0,
                    width: *width,
                    src: Source::Signal { signal: i, lo: 0 },
                }]
            })
            .collect();
        let taps = primitive
            .outputs()
            .iter()
            .enumerate()
            .map(|(i, (_, width))| Tap {
                pin: i,
                src_lo: 0,
                signal: input_count + i,
                dst_lo: 0,
                width: *width,
            })
            .collect();

        Plan::build(&ResolvedChip {
            name: String::from(primitive.name()),
            output_count: signals.len() - input_count,
            signals,
            input_count,
            parts: vec![ResolvedPart {
                label: format!("{}#0", primitive),
                kind: PartKind::Primitive(primitive),
                feeds,
                taps,
            }],
            links: Vec::new(),
        })
    }

    pub fn input(&self, name: &str) -> Option<&PinSlot> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&PinSlot> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Builds an input vector from pin values, using each pin's width.
    pub fn input_map(&self, values: &[(&str, u64)]) -> Result<BusMap, SimError> {
        let mut map = BusMap::new();
        for (name, value) in values {
            let pin = self.input(name).ok_or_else(|| {
                SimError::unresolved(format!("Chip {} has no input pin {}.", self.name, name))
            })?;
            map.insert_word(name, pin.width, *value);
        }
        Ok(map)
    }

    pub fn combinational_count(&self) -> usize {
        self.order.len()
    }
}

fn dependency_graph(ops: &[Op], slots: usize) -> Graph<String, Dependency> {
    let mut graph = Graph::new();
    let nodes: Vec<NodeIndex> = ops.iter().map(|op| graph.add_node(op.path.clone())).collect();

    let mut owner: Vec<Option<usize>> = vec![None; slots];
    for (i, op) in ops.iter().enumerate() {
        for (lo, (_, width)) in op.outputs.iter().zip(op.primitive.outputs()) {
            for slot in *lo..lo + width {
                owner[slot] = Some(i);
            }
        }
    }

    let mut seen = HashSet::new();
    for (j, op) in ops.iter().enumerate() {
        for c in &op.copies {
            for slot in c.src..c.src + c.width {
                if let Some(i) = owner[slot] {
                    if seen.insert((i, j)) {
                        let sequential =
                            ops[i].primitive.is_sequential() || op.primitive.is_sequential();
                        graph.add_edge(nodes[i], nodes[j], Dependency { sequential });
                    }
                }
            }
        }
    }
    graph
}

fn combinational_order(ops: &[Op], graph: &Graph<String, Dependency>) -> Result<Vec<usize>, SimError> {
    let combinational = graph.filter_map(
        |_, n| Some(n.clone()),
        |_, e| if e.sequential { None } else { Some(*e) },
    );

    if let Some(e) = combinational
        .edge_references()
        .find(|e| e.source() == e.target())
    {
        return Err(SimError::cyclic(format!(
            "Combinational cycle through {}.",
            combinational[e.source()]
        )));
    }

    match toposort(&combinational, None) {
        Ok(sorted) => Ok(sorted
            .into_iter()
            .map(|n| n.index())
            .filter(|&i| !ops[i].primitive.is_sequential())
            .collect()),
        Err(cycle) => {
            let members = kosaraju_scc(&combinational)
                .into_iter()
                .find(|scc| scc.contains(&cycle.node_id()))
                .unwrap_or_else(|| vec![cycle.node_id()]);
            let mut path: Vec<&str> = members
                .iter()
                .map(|n| combinational[*n].as_str())
                .collect();
            path.sort_unstable();
            Err(SimError::cyclic(format!(
                "Combinational cycle through {}.",
                path.join(" -> ")
            )))
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} parts ({} combinational, {} sequential), {} signal bits",
            self.name,
            self.ops.len(),
            self.combinational_count(),
            self.sequential.len(),
            self.slots
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definition::ChipDefinition;
    use crate::error::ErrorKind;
    use crate::library::ChipLibrary;

    fn plan_of(def: ChipDefinition) -> Result<std::rc::Rc<Plan>, SimError> {
        let library = ChipLibrary::new();
        let name = def.name.clone();
        library.add(def)?;
        library.plan(&name)
    }

    #[test]
    fn test_pc_plan() {
        let library = ChipLibrary::standard();
        let plan = library.plan("PC").unwrap();
        assert_eq!(plan.ops.len(), 6);
        assert_eq!(plan.sequential.len(), 1);
        assert_eq!(plan.order.len(), 5);
        assert!(plan
            .to_string()
            .starts_with("PC: 6 parts (5 combinational, 1 sequential)"));

        // The register output reaches the adder through a sequential edge.
        let position = |path: &str| {
            plan.order
                .iter()
                .position(|&i| plan.ops[i].path == path)
                .unwrap()
        };
        assert!(position("Add16#0") < position("Mux16#1"));
        assert!(position("Mux16#1") < position("Mux16#2"));
        assert!(position("Or#3") < position("Or#4"));
    }

    #[test]
    fn test_nested_probes() {
        let library = ChipLibrary::standard();
        let plan = library.plan("RAM64").unwrap();
        assert_eq!(plan.sequential.len(), 64);
        assert!(plan.probes.contains_key("address"));
        assert!(plan.probes.contains_key("RAM8#1/load"));
        assert_eq!(plan.probes["RAM8#8/address"].len(), 3);
        assert!(plan
            .ops
            .iter()
            .any(|op| op.path == "RAM8#1/Register#1"));
    }

    #[test]
    fn test_copies_are_merged() {
        let plan = Plan::for_primitive(Primitive::Add16).unwrap();
        assert_eq!(plan.ops.len(), 1);
        let op = &plan.ops[0];
        // a and b sit next to each other on both sides, so one copy moves both.
        assert_eq!(op.copies.len(), 1);
        assert_eq!(op.copies[0].width, 32);
        assert_eq!(plan.output_copies.len(), 1);
        assert_eq!(plan.input("b").unwrap().width, 16);
    }

    #[test]
    fn test_constants_are_preset() {
        let plan = plan_of(
            ChipDefinition::new("Ones")
                .input("x", 1)
                .output("out", 16)
                .part("Or16", &["a=false", "b=true", "out=out"])
                .unwrap(),
        )
        .unwrap();
        let op = &plan.ops[0];
        assert!(op.copies.is_empty());
        let b = op.inputs[1];
        assert!(plan.initial[b..b + 16].all());
        let a = op.inputs[0];
        assert!(plan.initial[a..a + 16].not_any());
    }

    #[test]
    fn test_combinational_cycle() {
        let def = ChipDefinition::new("Latch")
            .input("x", 1)
            .output("out", 1)
            .part("Nand", &["a=x", "b=q", "out=p", "out=out"])
            .unwrap()
            .part("Not", &["in=p", "out=q"])
            .unwrap();
        let e = plan_of(def).unwrap_err();
        assert_eq!(e.kind, ErrorKind::CyclicCombinational);
        assert!(e.msg.contains("Nand#0"));
        assert!(e.msg.contains("Not#1"));
    }

    #[test]
    fn test_self_feeding_gate() {
        let def = ChipDefinition::new("Loop")
            .input("x", 1)
            .output("out", 1)
            .part("And", &["a=x", "b=q", "out=q", "out=out"])
            .unwrap();
        assert_eq!(plan_of(def).unwrap_err().kind, ErrorKind::CyclicCombinational);
    }

    #[test]
    fn test_alias_cycle() {
        let def = ChipDefinition::new("Wires")
            .input("x", 1)
            .output("out", 1)
            .assign("p=q")
            .unwrap()
            .assign("q=p")
            .unwrap()
            .part("And", &["a=x", "b=p", "out=out"])
            .unwrap();
        assert_eq!(plan_of(def).unwrap_err().kind, ErrorKind::CyclicCombinational);
    }

    #[test]
    fn test_register_loop_is_legal() {
        let plan = plan_of(
            ChipDefinition::new("Counter")
                .input("run", 1)
                .output("out", 16)
                .part("Inc16", &["in=q", "out=next"])
                .unwrap()
                .part("Register", &["in=next", "load=run", "out=q", "out=out"])
                .unwrap(),
        )
        .unwrap();
        assert_eq!(plan.order.len(), 1);
        assert_eq!(plan.sequential, vec![1]);
        assert!(plan
            .graph
            .edge_weights()
            .all(|d| d.sequential));
    }

    #[test]
    fn test_input_map() {
        let plan = Plan::for_primitive(Primitive::Mux4Way16).unwrap();
        let map = plan.input_map(&[("a", 7), ("sel", 3)]).unwrap();
        assert_eq!(map.get_width("a"), Some(16));
        assert_eq!(map.get_width("sel"), Some(2));
        assert_eq!(
            plan.input_map(&[("e", 1)]).unwrap_err().kind,
            ErrorKind::UnresolvedReference
        );
    }
}

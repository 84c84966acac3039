//! Pin and bus bindings.
//!
//! Resolves the connection expressions of one chip definition into bit-range
//! copies between part pins and the chip's signals. This is where every
//! load-time check on wiring happens: widths, slice bounds, overlapping or
//! missing input bits, fan-in and undriven signals.

use crate::definition::{Actual, Binding, ChipDefinition, PinDecl, PinRef};
use crate::error::SimError;
use crate::gates::Primitive;
use crate::library::{ChipLibrary, ChipType};
use bitvec::prelude::*;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalRole {
    Input,
    Output,
    Internal,
}

#[derive(Clone, Debug)]
pub struct Signal {
    pub name: String,
    pub width: usize,
    pub role: SignalRole,
}

/// Where the bits of a segment come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Signal { signal: usize, lo: usize },
    Const(bool),
}

/// Part input pin bits `dst_lo..dst_lo + width` are fed from `src`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub dst_lo: usize,
    pub width: usize,
    pub src: Source,
}

/// Part output pin bits `src_lo..` drive signal bits `dst_lo..`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tap {
    pub pin: usize,
    pub src_lo: usize,
    pub signal: usize,
    pub dst_lo: usize,
    pub width: usize,
}

/// A chip-level assignment: signal bits `dst_lo..` are driven by `src`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub signal: usize,
    pub dst_lo: usize,
    pub width: usize,
    pub src: Source,
}

#[derive(Clone, Debug)]
pub enum PartKind {
    Primitive(Primitive),
    Chip(Rc<ResolvedChip>),
}

#[derive(Clone, Debug)]
pub struct ResolvedPart {
    /// `Chip#index`, unique within the parent.
    pub label: String,
    pub kind: PartKind,
    /// Per formal input pin, the segments covering all of its bits.
    pub feeds: Vec<Vec<Segment>>,
    pub taps: Vec<Tap>,
}

/// A chip definition with every binding resolved to signal indices.
/// Signals are ordered inputs, outputs, then internal signals.
#[derive(Clone, Debug)]
pub struct ResolvedChip {
    pub name: String,
    pub signals: Vec<Signal>,
    pub input_count: usize,
    pub output_count: usize,
    pub parts: Vec<ResolvedPart>,
    pub links: Vec<Link>,
}

impl ResolvedChip {
    pub fn inputs(&self) -> &[Signal] {
        &self.signals[..self.input_count]
    }

    pub fn outputs(&self) -> &[Signal] {
        &self.signals[self.input_count..self.input_count + self.output_count]
    }
}

/// Pin declarations of a part's chip type.
struct Interface {
    inputs: Vec<PinDecl>,
    outputs: Vec<PinDecl>,
}

impl Interface {
    fn of(chip: &ChipType) -> Interface {
        match chip {
            ChipType::Primitive(p) => Interface {
                inputs: decls(p.inputs()),
                outputs: decls(p.outputs()),
            },
            ChipType::Composite(d) => Interface {
                inputs: d.inputs.clone(),
                outputs: d.outputs.clone(),
            },
        }
    }

    /// Finds a formal pin: (is input, index, width).
    fn pin(&self, name: &str, label: &str) -> Result<(bool, usize, usize), SimError> {
        if let Some(i) = self.inputs.iter().position(|p| p.name == name) {
            return Ok((true, i, self.inputs[i].width));
        }
        if let Some(i) = self.outputs.iter().position(|p| p.name == name) {
            return Ok((false, i, self.outputs[i].width));
        }
        Err(SimError::unresolved(format!(
            "Attempt to get non-existent port {} of {}.",
            name, label
        )))
    }
}

fn decls(pins: &[(&'static str, usize)]) -> Vec<PinDecl> {
    pins.iter()
        .map(|(name, width)| PinDecl {
            name: String::from(*name),
            width: *width,
        })
        .collect()
}

/// Width constraints collected for implicit internal signals.
#[derive(Default)]
struct WidthTable {
    order: Vec<String>,
    exact: HashMap<String, usize>,
    minimum: HashMap<String, usize>,
}

impl WidthTable {
    fn note(&mut self, r: &PinRef, bound: Option<usize>) -> Result<bool, SimError> {
        if !self.order.contains(&r.name) {
            self.order.push(r.name.clone());
        }

        let mut changed = false;
        if let Some(range) = r.range {
            let m = self.minimum.entry(r.name.clone()).or_insert(0);
            if *m < range.hi + 1 {
                *m = range.hi + 1;
                changed = true;
            }
        } else if let Some(w) = bound {
            match self.exact.get(&r.name) {
                Some(&current) if current != w => {
                    return Err(SimError::configuration(format!(
                        "Inconsistent width for signal {}. Current width: {}, asked for: {}",
                        r.name, current, w
                    )));
                }
                Some(_) => {}
                None => {
                    self.exact.insert(r.name.clone(), w);
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    fn width(&self, name: &str) -> Option<usize> {
        self.exact.get(name).copied()
    }
}

struct Binder<'a> {
    def: &'a ChipDefinition,
    signals: Vec<Signal>,
    index: HashMap<String, usize>,
    // Bits of each signal already driven.
    driven: Vec<BitVec>,
    // Signal reads to check once every driver is known: (signal, lo, width, reader).
    reads: Vec<(usize, usize, usize, String)>,
}

/// Resolves the bindings of `def`. Parts that are themselves chips are
/// resolved through `library`, which caches them.
pub fn resolve_chip(def: &ChipDefinition, library: &ChipLibrary) -> Result<ResolvedChip, SimError> {
    let mut binder = Binder {
        def,
        signals: Vec::new(),
        index: HashMap::new(),
        driven: Vec::new(),
        reads: Vec::new(),
    };

    for p in &def.inputs {
        binder.declare(&p.name, p.width, SignalRole::Input)?;
    }
    for p in &def.outputs {
        binder.declare(&p.name, p.width, SignalRole::Output)?;
    }
    let input_count = def.inputs.len();
    let output_count = def.outputs.len();

    let mut kinds = Vec::new();
    let mut interfaces = Vec::new();
    for part in &def.parts {
        let chip = library.lookup(&part.chip)?;
        interfaces.push(Interface::of(&chip));
        kinds.push(match chip {
            ChipType::Primitive(p) => PartKind::Primitive(p),
            ChipType::Composite(_) => PartKind::Chip(library.resolve(&part.chip)?),
        });
    }

    binder.infer_widths(&interfaces)?;

    let mut parts = Vec::new();
    for (idx, (part, kind)) in def.parts.iter().zip(kinds).enumerate() {
        let label = format!("{}#{}", part.chip, idx);
        let (feeds, taps) = binder.bind_part(&label, &part.bindings, &interfaces[idx])?;
        parts.push(ResolvedPart {
            label,
            kind,
            feeds,
            taps,
        });
    }

    let mut links = Vec::new();
    for a in &def.assignments {
        links.push(binder.bind_assignment(a)?);
    }

    binder.check_drivers()?;
    tracing::debug!(
        chip = %def.name,
        signals = binder.signals.len(),
        parts = parts.len(),
        "resolved bindings"
    );

    Ok(ResolvedChip {
        name: def.name.clone(),
        signals: binder.signals,
        input_count,
        output_count,
        parts,
        links,
    })
}

impl<'a> Binder<'a> {
    fn declare(&mut self, name: &str, width: usize, role: SignalRole) -> Result<usize, SimError> {
        if width == 0 {
            return Err(SimError::configuration(format!(
                "Pin {} of chip {} has zero width.",
                name, self.def.name
            )));
        }
        if name == "true" || name == "false" {
            return Err(SimError::configuration(format!(
                "{} cannot be used as a pin name in chip {}.",
                name, self.def.name
            )));
        }
        if self.index.contains_key(name) {
            return Err(SimError::configuration(format!(
                "Pin {} is declared twice in chip {}.",
                name, self.def.name
            )));
        }
        let mut driven = BitVec::repeat(false, width);
        if role == SignalRole::Input {
            driven.fill(true);
        }
        self.index.insert(String::from(name), self.signals.len());
        self.signals.push(Signal {
            name: String::from(name),
            width,
            role,
        });
        self.driven.push(driven);
        Ok(self.signals.len() - 1)
    }

    // Width of a reference whose name may not have a width yet.
    fn known_width(&self, r: &PinRef, table: &WidthTable) -> Option<usize> {
        if let Some(range) = r.range {
            return Some(range.width());
        }
        match self.index.get(&r.name) {
            Some(&i) => Some(self.signals[i].width),
            None => table.width(&r.name),
        }
    }

    /// Infers the width of every implicit internal signal. An unsliced
    /// reference fixes the width; a sliced one requires the signal to be at
    /// least `hi + 1` bits wide.
    fn infer_widths(&mut self, interfaces: &[Interface]) -> Result<(), SimError> {
        let def = self.def;
        let mut table = WidthTable::default();

        for (idx, part) in def.parts.iter().enumerate() {
            let label = format!("{}#{}", part.chip, idx);
            for b in &part.bindings {
                let (_, _, pin_width) = interfaces[idx].pin(&b.formal.name, &label)?;
                b.formal.check_within(pin_width)?;
                let formal_width = b.formal.width_within(pin_width);
                if let Actual::Wire(w) = &b.actual {
                    if !self.index.contains_key(&w.name) {
                        table.note(w, Some(formal_width))?;
                    }
                }
            }
        }

        // Assignments can chain signals, so iterate until nothing changes.
        loop {
            let mut changed = false;
            for a in &def.assignments {
                let src_width = match &a.actual {
                    Actual::Wire(w) => self.known_width(w, &table),
                    Actual::Literal(_) => None,
                };
                let dst_width = self.known_width(&a.formal, &table);
                if !self.index.contains_key(&a.formal.name) {
                    changed |= table.note(&a.formal, src_width)?;
                }
                if let Actual::Wire(w) = &a.actual {
                    if !self.index.contains_key(&w.name) {
                        changed |= table.note(w, dst_width)?;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        for name in &table.order {
            let minimum = table.minimum.get(name).copied().unwrap_or(0);
            let width = match table.exact.get(name) {
                Some(&w) if w < minimum => {
                    return Err(SimError::configuration(format!(
                        "Bit {} of signal {} is out of range (width {}) in chip {}.",
                        minimum - 1,
                        name,
                        w,
                        self.def.name
                    )));
                }
                Some(&w) => w,
                None if minimum > 0 => minimum,
                None => {
                    return Err(SimError::configuration(format!(
                        "Cannot infer the width of signal {} in chip {}.",
                        name, self.def.name
                    )));
                }
            };
            self.declare(name, width, SignalRole::Internal)?;
        }
        Ok(())
    }

    // Resolves a wire reference to (signal, lo, width) with bounds checked.
    fn wire(&self, w: &PinRef) -> Result<(usize, usize, usize), SimError> {
        let signal = *self.index.get(&w.name).ok_or_else(|| {
            SimError::unresolved(format!(
                "No source for signal name {} in chip {}.",
                w.name, self.def.name
            ))
        })?;
        let full = self.signals[signal].width;
        w.check_within(full)?;
        Ok((signal, w.lo(), w.width_within(full)))
    }

    fn drive(&mut self, signal: usize, lo: usize, width: usize, by: &str) -> Result<(), SimError> {
        let s = &self.signals[signal];
        if s.role == SignalRole::Input {
            return Err(SimError::configuration(format!(
                "Chip input {} of {} cannot be driven by {}.",
                s.name, self.def.name, by
            )));
        }
        for bit in lo..lo + width {
            if self.driven[signal][bit] {
                return Err(SimError::configuration(format!(
                    "Duplicate source for signal name {} (bit {}) in chip {}.",
                    s.name, bit, self.def.name
                )));
            }
            self.driven[signal].set(bit, true);
        }
        Ok(())
    }

    fn source(&mut self, actual: &Actual, width: usize, reader: &str) -> Result<Source, SimError> {
        match actual {
            Actual::Literal(v) => Ok(Source::Const(*v)),
            Actual::Wire(w) => {
                let (signal, lo, actual_width) = self.wire(w)?;
                if actual_width != width {
                    return Err(width_mismatch(reader, width, w, actual_width));
                }
                self.reads.push((signal, lo, width, String::from(reader)));
                Ok(Source::Signal { signal, lo })
            }
        }
    }

    fn bind_part(
        &mut self,
        label: &str,
        bindings: &[Binding],
        interface: &Interface,
    ) -> Result<(Vec<Vec<Segment>>, Vec<Tap>), SimError> {
        let mut feeds: Vec<Vec<Segment>> = vec![Vec::new(); interface.inputs.len()];
        let mut covered: Vec<BitVec> = interface
            .inputs
            .iter()
            .map(|p| BitVec::repeat(false, p.width))
            .collect();
        let mut taps = Vec::new();

        for b in bindings {
            let (is_input, pin, pin_width) = interface.pin(&b.formal.name, label)?;
            b.formal.check_within(pin_width)?;
            let formal_lo = b.formal.lo();
            let formal_width = b.formal.width_within(pin_width);
            let reader = format!("{}.{}", label, b.formal);

            if is_input {
                for bit in formal_lo..formal_lo + formal_width {
                    if covered[pin][bit] {
                        return Err(SimError::configuration(format!(
                            "Overlapping bindings for bit {} of pin {} in part {} of chip {}.",
                            bit, b.formal.name, label, self.def.name
                        )));
                    }
                    covered[pin].set(bit, true);
                }
                let src = self.source(&b.actual, formal_width, &reader)?;
                feeds[pin].push(Segment {
                    dst_lo: formal_lo,
                    width: formal_width,
                    src,
                });
            } else {
                let w = match &b.actual {
                    Actual::Wire(w) => w,
                    Actual::Literal(_) => {
                        return Err(SimError::configuration(format!(
                            "Output pin {} of part {} cannot be bound to a constant.",
                            b.formal.name, label
                        )))
                    }
                };
                let (signal, lo, actual_width) = self.wire(w)?;
                if actual_width != formal_width {
                    return Err(width_mismatch(&reader, formal_width, w, actual_width));
                }
                self.drive(signal, lo, actual_width, label)?;
                taps.push(Tap {
                    pin,
                    src_lo: formal_lo,
                    signal,
                    dst_lo: lo,
                    width: actual_width,
                });
            }
        }

        for (pin, bits) in covered.iter().enumerate() {
            if bits.not_all() {
                return Err(SimError::configuration(format!(
                    "Part {} of chip {} does not provide inputs for all bits of {}.",
                    label, self.def.name, interface.inputs[pin].name
                )));
            }
        }

        // Keep segments in pin bit order.
        for f in &mut feeds {
            f.sort_by_key(|s| s.dst_lo);
        }
        Ok((feeds, taps))
    }

    fn bind_assignment(&mut self, a: &Binding) -> Result<Link, SimError> {
        let (signal, dst_lo, width) = self.wire(&a.formal)?;
        let reader = format!("{} <= {}", a.formal, a.actual);
        let src = self.source(&a.actual, width, &reader)?;
        self.drive(signal, dst_lo, width, &reader)?;
        Ok(Link {
            signal,
            dst_lo,
            width,
            src,
        })
    }

    fn check_drivers(&self) -> Result<(), SimError> {
        for (i, s) in self.signals.iter().enumerate() {
            if s.role != SignalRole::Output {
                continue;
            }
            if let Some(bit) = self.driven[i].first_zero() {
                return Err(SimError::configuration(format!(
                    "Output pin {} (bit {}) of chip {} is not driven.",
                    s.name, bit, self.def.name
                )));
            }
        }

        for (signal, lo, width, reader) in &self.reads {
            let s = &self.signals[*signal];
            if s.role == SignalRole::Internal && self.driven[*signal].not_any() {
                return Err(SimError::unresolved(format!(
                    "No source for signal name {} (read by {} in chip {}).",
                    s.name, reader, self.def.name
                )));
            }
            if let Some(bit) = self.driven[*signal][*lo..*lo + *width].first_zero() {
                return Err(SimError::configuration(format!(
                    "Bit {} for signal name {} is undefined (read by {} in chip {}).",
                    lo + bit,
                    self.signals[*signal].name,
                    reader,
                    self.def.name
                )));
            }
        }
        Ok(())
    }
}

fn width_mismatch(reader: &str, expected: usize, w: &PinRef, actual: usize) -> SimError {
    SimError::configuration(format!(
        "Width mismatch: {} is {} bits wide but {} is {} bits wide.",
        reader, expected, w, actual
    ))
}

// SPDX-License-Identifier: BSD-3-Clause
//! Function pointer analysis
//!
//! A flow-sensitive, context-insensitive points-to analysis whose main
//! product is the set of functions each call site may invoke.
//!
//! Each function body is solved to a local fixpoint with
//! [`comp_forward_dataflow`]. Calls bind the caller's state onto the callee's
//! parameters and merge it into the callee's entry state; returns unbind the
//! callee's state and merge it into the exit state of every call site known to
//! target the function. Whenever either merge changes something, the affected
//! function goes back on the worklist. All states only grow, and there are
//! finitely many values, so the worklist eventually empties.
//!
//! Static initializers of globals are assumed to hold on entry to every
//! function: a scalar global points to its targets directly, and an array or
//! struct holds them in its fields.
//!
//! Sources of unsoundness:
//!
//! - External functions: calls to declarations pass their input state through
//!   unchanged
//! - Non-pointer values stored to memory are not tracked
//! - Pointer casts are transparent only to `memcpy`

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::{debug, trace, trace_span};

use crate::analysis::binder::Binding;
use crate::analysis::callgraph::{resolve_callees, CallGraph, CallReport};
use crate::dataflow::{comp_forward_dataflow, DataflowResult, DataflowVisitor};
use crate::ir::instruction::{Call, GetElementPtr, Load, MemCpy, Phi, Ret, Store};
use crate::ir::{FunctionId, InstId, Module, Opcode, ValueId};
use crate::lattice::{PointsToInfo, ValueSet};
use crate::worklist::FunctionWorklist;

#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Print every instruction's states to stderr after convergence
    pub debug: bool,
    pub metrics: bool,
    /// Give up after this many functions have been dequeued
    pub max_dequeues: Option<usize>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("No fixpoint after {dequeues} function visits (last visited: @{function})")]
    Diverged { function: String, dequeues: usize },
}

/// Statistics about one run. For the size metrics, lower means more precise.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Metrics {
    /// Functions taken off the worklist, counting repeats
    pub dequeues: usize,
    /// Passes over function bodies, summed across dequeues
    pub passes: usize,
    /// Number of call sites in the module
    pub call_sites: usize,
    /// Number of edges from a call site to a possible callee
    pub callgraph_size: usize,
    /// Call sites whose callee is not syntactically a function
    pub indirect_sites: usize,
    /// Call sites with no known callee
    pub unresolved_sites: usize,
    /// Facts in the largest single state
    pub largest_state: usize,
}

#[derive(Debug)]
pub struct Outputs {
    pub call_graph: CallGraph,
    /// Entry state of each analyzed function
    pub entries: FxHashMap<FunctionId, PointsToInfo>,
    pub states: DataflowResult<PointsToInfo>,
    pub metrics: Option<Metrics>,
}

impl Outputs {
    pub fn callees(&self, site: InstId) -> Option<&BTreeSet<FunctionId>> {
        self.call_graph.callees(site)
    }

    /// State just after `i`
    pub fn state_after(&self, i: InstId) -> Option<&PointsToInfo> {
        self.states.output(i)
    }

    /// Union of the states at every return of `f`
    pub fn exit_state(&self, module: &Module, f: FunctionId) -> PointsToInfo {
        let mut exit = PointsToInfo::bottom();
        for i in module.function(f).instructions() {
            if let Opcode::Ret(_) = module.instruction(i).opcode {
                if let Some(s) = self.states.output(i) {
                    exit.merge(s);
                }
            }
        }
        exit
    }

    pub fn report(&self, module: &Module) -> Vec<CallReport> {
        self.call_graph.report(module)
    }

    /// Every instruction's IN and OUT states, in instruction order.
    pub fn dump_states(&self, module: &Module) -> String {
        let mut out = String::new();
        for (i, (input, output)) in self.states.iter() {
            let inst = module.instruction(i);
            out.push_str(&format!(
                "[{}] {} = {}\n",
                module.location(i),
                module.value(inst.value()),
                inst.opcode.mnemonic()
            ));
            out.push_str(&format!("    in:  {}\n", input.display(module)));
            out.push_str(&format!("    out: {}\n", output.display(module)));
        }
        out
    }
}

// ------------------------------------------------------------------
// Transfer functions

/// What a field access of `base` points into: whatever `base` points to, or
/// `base` itself when that is unknown.
fn base_objects(state: &PointsToInfo, base: ValueId) -> ValueSet {
    match state.points_to(base) {
        Some(s) if !s.is_empty() => s.clone(),
        _ => ValueSet::from([base]),
    }
}

/// Objects whose fields the field access `gep` may address
fn field_bases(module: &Module, state: &PointsToInfo, gep: ValueId) -> ValueSet {
    if state.is_resolved(gep) {
        return base_objects(state, gep);
    }
    match module.defining_instruction(gep).map(|i| &i.opcode) {
        Some(Opcode::GetElementPtr(g)) => base_objects(state, g.pointer),
        _ => ValueSet::from([gep]),
    }
}

fn identity(slot: &mut (PointsToInfo, PointsToInfo)) {
    slot.1 = slot.0.clone();
}

fn phi(module: &Module, value: ValueId, phi: &Phi, slot: &mut (PointsToInfo, PointsToInfo)) {
    let (input, output) = slot;
    let mut set = ValueSet::new();
    for v in &phi.values {
        if module.as_function(*v).is_some() {
            set.insert(*v);
        } else if let Some(s) = input.points_to(*v) {
            set.extend(s.iter().copied());
        }
    }
    *output = input.clone();
    output.set_points_to(value, set);
}

fn load(module: &Module, value: ValueId, load: &Load, slot: &mut (PointsToInfo, PointsToInfo)) {
    let (input, output) = slot;
    let set = if module.is_field_access(load.pointer) {
        let mut set = ValueSet::new();
        for base in field_bases(module, input, load.pointer) {
            if let Some(s) = input.field_points_to(base) {
                set.extend(s.iter().copied());
            }
        }
        set
    } else {
        input.points_to(load.pointer).cloned().unwrap_or_default()
    };
    *output = input.clone();
    output.set_points_to(value, set);
}

fn store(module: &Module, store: &Store, slot: &mut (PointsToInfo, PointsToInfo)) {
    let (input, output) = slot;
    *output = input.clone();
    if !module.value(store.value).is_pointer() {
        return;
    }
    let stored = base_objects(input, store.value);
    if module.is_field_access(store.pointer) {
        let bases = field_bases(module, input, store.pointer);
        if bases.len() == 1 {
            for b in bases {
                output.set_field_points_to(b, stored.clone());
            }
        } else {
            for b in bases {
                output.add_field_points_to(b, stored.iter().copied());
            }
        }
    } else {
        output.set_points_to(store.pointer, stored);
    }
}

fn gep(value: ValueId, gep: &GetElementPtr, slot: &mut (PointsToInfo, PointsToInfo)) {
    let (input, output) = slot;
    *output = input.clone();
    output.set_points_to(value, base_objects(input, gep.pointer));
}

fn memcpy(module: &Module, memcpy: &MemCpy, slot: &mut (PointsToInfo, PointsToInfo)) {
    let (input, output) = slot;
    *output = input.clone();
    let dst = module.strip_casts(memcpy.dst);
    let src = module.strip_casts(memcpy.src);
    // The copy replaces whatever `dst` held, even when `src` held nothing
    output.set_points_to(dst, input.points_to(src).cloned().unwrap_or_default());
    output.set_field_points_to(dst, input.field_points_to(src).cloned().unwrap_or_default());
}

// ------------------------------------------------------------------
// Interprocedural propagation

#[derive(Debug, Default)]
struct PointerVisitor {
    call_graph: CallGraph,
    entries: FxHashMap<FunctionId, PointsToInfo>,
    worklist: FunctionWorklist,
}

impl PointerVisitor {
    fn enqueue(&mut self, module: &Module, f: FunctionId, reason: &'static str) {
        if self.worklist.push(f) {
            debug!(function = module.function(f).name(), reason, "enqueue");
        }
    }

    fn call(
        &mut self,
        module: &Module,
        i: InstId,
        call: &Call,
        result: &mut DataflowResult<PointsToInfo>,
    ) {
        let input = result.entry(i).0.clone();
        let callees = resolve_callees(module, call.callee, &input);
        for f in self.call_graph.record(i, callees.iter().copied()) {
            let callee = module.function(f);
            debug!(
                site = %module.value(module.instruction(i).value()),
                callee = callee.name(),
                "new call edge"
            );
            // The callee's returns must now also reach this site
            if !callee.is_declaration() {
                self.enqueue(module, f, "new caller");
            }
        }

        let mut output = std::mem::take(&mut result.entry(i).1);
        let mut pass_through = callees.is_empty();
        for f in &callees {
            if module.function(*f).is_declaration() {
                pass_through = true;
                continue;
            }
            let binding = Binding::new(module, call, *f);
            if binding.is_empty() {
                pass_through = true;
            }
            let bound = binding.bind(module, &input);
            if self.entries.entry(*f).or_default().merge(&bound) {
                self.enqueue(module, *f, "entry state changed");
            }
        }
        if pass_through {
            output.merge(&input);
        }
        result.entry(i).1 = output;
    }

    fn ret(
        &mut self,
        module: &Module,
        i: InstId,
        ret: &Ret,
        result: &mut DataflowResult<PointsToInfo>,
    ) {
        let f = module.instruction(i).function();
        let state = {
            let slot = result.entry(i);
            identity(slot);
            slot.1.clone()
        };
        let sites: Vec<InstId> = self.call_graph.callers_of(f).collect();
        for site in sites {
            let call_inst = module.instruction(site);
            let Opcode::Call(call) = &call_inst.opcode else {
                continue;
            };
            let binding = Binding::new(module, call, f);
            let mut exit = state.clone();
            if let Some(r) = ret.operand {
                if module.value(r).is_pointer() {
                    let returned = base_objects(&exit, r);
                    if !binding.binds_parameter(r) {
                        exit.remove_points_to(r);
                    }
                    exit.set_points_to(call_inst.value(), returned);
                }
            }
            let exit = binding.unbind(&exit);
            if result.entry(site).1.merge(&exit) {
                self.enqueue(module, call_inst.function(), "call exit state changed");
            }
        }
    }
}

impl DataflowVisitor for PointerVisitor {
    type Info = PointsToInfo;

    fn comp_df_val(
        &mut self,
        module: &Module,
        i: InstId,
        result: &mut DataflowResult<PointsToInfo>,
    ) {
        let inst = module.instruction(i);
        let value = inst.value();
        trace!(op = inst.opcode.mnemonic(), value = %module.value(value), "transfer");
        match &inst.opcode {
            Opcode::Phi(p) => phi(module, value, p, result.entry(i)),
            Opcode::Load(l) => load(module, value, l, result.entry(i)),
            Opcode::Store(s) => store(module, s, result.entry(i)),
            Opcode::GetElementPtr(g) => gep(value, g, result.entry(i)),
            Opcode::MemCpy(m) => memcpy(module, m, result.entry(i)),
            Opcode::Call(c) => self.call(module, i, c, result),
            Opcode::Ret(r) => self.ret(module, i, r, result),
            // No `_` pattern to ensure this is updated if the type changes
            Opcode::BitCast(_) => identity(result.entry(i)),
            Opcode::Br(_) => identity(result.entry(i)),
            Opcode::Other => identity(result.entry(i)),
        }
    }
}

// ------------------------------------------------------------------
// Driver

/// Facts established by the static initializers of globals
fn initial_state(module: &Module) -> PointsToInfo {
    let mut state = PointsToInfo::bottom();
    for init in module.initializers() {
        let targets = init.targets.iter().copied();
        if init.aggregate {
            state.add_field_points_to(init.global, targets);
        } else {
            state.add_points_to(init.global, targets);
        }
    }
    state
}

fn collect_metrics(
    module: &Module,
    visitor: &PointerVisitor,
    result: &DataflowResult<PointsToInfo>,
) -> Metrics {
    let mut m = Metrics {
        call_sites: visitor.call_graph.len(),
        callgraph_size: visitor.call_graph.edges(),
        ..Metrics::default()
    };
    for (site, callees) in visitor.call_graph.sites() {
        if let Opcode::Call(c) = &module.instruction(site).opcode {
            if module.as_function(c.callee).is_none() {
                m.indirect_sites += 1;
            }
        }
        if callees.is_empty() {
            m.unresolved_sites += 1;
        }
    }
    m.largest_state = result
        .iter()
        .map(|(_, (input, output))| input.size().max(output.size()))
        .max()
        .unwrap_or(0);
    m
}

/// Function pointer analysis
///
/// Every function with a body starts on the worklist. Returns an error only
/// if `opts.max_dequeues` is exceeded.
pub fn analysis(module: &Module, opts: &Options) -> Result<Outputs, AnalysisError> {
    let span = trace_span!("pointer_analysis");
    let _span = span.enter();

    let mut visitor = PointerVisitor::default();
    for site in module.call_sites() {
        visitor.call_graph.add_site(site);
    }
    visitor.worklist.extend(module.defined_functions());
    let initial = initial_state(module);
    if !initial.is_empty() {
        for f in module.defined_functions() {
            visitor.entries.entry(f).or_default().merge(&initial);
        }
    }

    let mut result = DataflowResult::new();
    let mut dequeues = 0;
    let mut passes = 0;
    while let Some(f) = visitor.worklist.pop() {
        let func = module.function(f);
        if opts.max_dequeues.is_some_and(|max| dequeues >= max) {
            return Err(AnalysisError::Diverged {
                function: func.name().to_string(),
                dequeues,
            });
        }
        dequeues += 1;
        let span = trace_span!("function", name = func.name());
        let _span = span.enter();
        let entry = visitor.entries.get(&f).cloned().unwrap_or_default();
        passes += comp_forward_dataflow(module, f, &mut visitor, &mut result, &entry);
    }
    debug!(dequeues, passes, "fixpoint reached");

    let metrics = if opts.metrics {
        Some(Metrics {
            dequeues,
            passes,
            ..collect_metrics(module, &visitor, &result)
        })
    } else {
        None
    };
    let outs = Outputs {
        call_graph: visitor.call_graph,
        entries: visitor.entries,
        states: result,
        metrics,
    };
    if opts.debug {
        eprintln!("{}", outs.dump_states(module));
    }
    Ok(outs)
}

#[cfg(test)]
mod tests {
    use super::{analysis, AnalysisError, Options};
    use crate::ir::{Module, ModuleBuilder, Ty};

    /// `rec(f)` calls itself through a pointer it keeps re-deriving
    fn recursive() -> Module {
        let mut mb = ModuleBuilder::new();
        let rec = mb.declare("rec", &[Ty::Pointer], Ty::Pointer).unwrap();
        let main = mb.declare("main", &[], Ty::Void).unwrap();
        let rec_v = mb.function_value(rec);
        let p = mb.param(rec, 0);
        {
            let mut body = mb.body(rec).unwrap();
            let entry = body.block("entry");
            let q = body.gep(entry, p);
            let r = body.call(entry, p, vec![q]);
            body.ret(entry, Some(r));
        }
        {
            let mut body = mb.body(main).unwrap();
            let entry = body.block("entry");
            body.call(entry, rec_v, vec![rec_v]);
            body.ret(entry, None);
        }
        mb.finish().unwrap()
    }

    #[test]
    fn recursion_converges() {
        let m = recursive();
        let outs = analysis(
            &m,
            &Options {
                metrics: true,
                ..Options::default()
            },
        )
        .unwrap();
        let rec = m.function_by_name("rec").unwrap();
        let site = m.function(rec).blocks()[0].instructions()[1];
        assert!(outs.callees(site).unwrap().contains(&rec));
        let metrics = outs.metrics.unwrap();
        assert_eq!(metrics.call_sites, 2);
        assert_eq!(metrics.indirect_sites, 1);
        assert_eq!(metrics.unresolved_sites, 0);
    }

    #[test]
    fn dequeue_ceiling() {
        let m = recursive();
        let err = analysis(
            &m,
            &Options {
                max_dequeues: Some(1),
                ..Options::default()
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            AnalysisError::Diverged {
                function: "main".to_string(),
                dequeues: 1
            }
        );
    }

    #[test]
    fn dump_mentions_every_instruction() {
        let m = recursive();
        let outs = analysis(&m, &Options::default()).unwrap();
        let dump = outs.dump_states(&m);
        assert_eq!(dump.lines().filter(|l| l.starts_with('[')).count(), 5);
        assert!(dump.contains("rec:arg0 -> @rec"));
    }
}

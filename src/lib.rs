// SPDX-License-Identifier: BSD-3-Clause
//! Flow-sensitive, interprocedural function pointer analysis
//!
//! Build an [`ir::Module`] (with [`ir::ModuleBuilder`], from JSON via
//! [`ir::Module::from_json`], or from LLVM bitcode with the `llvm` feature),
//! then run [`pointer::analysis`] and query the resulting call graph.

pub mod analysis;
pub mod dataflow;
pub mod ir;
pub mod lattice;
pub mod layers;
#[cfg(feature = "llvm")]
pub mod llvm;
pub mod worklist;

pub use analysis::callgraph::{CallGraph, CallReport};
pub use analysis::pointer;
pub use ir::{FunctionId, InstId, Module, ModuleBuilder, Ty, ValueId};
pub use lattice::{PointsToInfo, ValueSet};

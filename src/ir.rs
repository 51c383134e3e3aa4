// SPDX-License-Identifier: BSD-3-Clause
//! Representation of a program that is amenable to analysis.
//!
//! Every entity the analysis talks about (functions, parameters, instruction
//! results, globals, constants) lives in an arena owned by [`Module`] and is
//! referred to by a small index such as [`ValueId`]. Indices compare by
//! identity, are `Copy`, and can be used as map keys directly, so the
//! analysis never holds references into the module across a fixpoint.
//!
//! Modules are produced by [`ModuleBuilder`], either directly (tests,
//! benchmarks), from a JSON description ([`json`]), or from LLVM bitcode
//! (`crate::llvm`, behind the `llvm` feature).

use rustc_hash::FxHashMap;

mod builder;
pub use builder::*;
mod error;
pub use error::*;
pub mod instruction;
pub use instruction::Opcode;
pub mod json;
mod name;
pub use name::*;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ty {
    Pointer,
    Int,
    Void,
}

impl Ty {
    #[inline]
    pub fn is_pointer(self) -> bool {
        matches!(self, Ty::Pointer)
    }
}

#[derive(Clone, Debug)]
pub struct Instruction {
    pub(crate) value: ValueId,
    pub(crate) function: FunctionId,
    pub(crate) block: BlockId,
    pub opcode: Opcode,
    pub(crate) line: Option<u32>,
}

impl Instruction {
    /// The value this instruction defines. Every instruction has one, even
    /// those whose result is `void`, so that call sites have an identity.
    #[inline]
    pub fn value(&self) -> ValueId {
        self.value
    }

    #[inline]
    pub fn function(&self) -> FunctionId {
        self.function
    }

    #[inline]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Source line, when the frontend had debug information.
    #[inline]
    pub fn line(&self) -> Option<u32> {
        self.line
    }
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub(crate) name: String,
    pub(crate) instrs: Vec<InstId>,
    pub(crate) succs: Vec<BlockId>,
    pub(crate) preds: Vec<BlockId>,
}

impl Block {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &[InstId] {
        &self.instrs
    }

    pub fn successors(&self) -> &[BlockId] {
        &self.succs
    }

    pub fn predecessors(&self) -> &[BlockId] {
        &self.preds
    }

    pub fn first(&self) -> Option<InstId> {
        self.instrs.first().copied()
    }

    pub fn last(&self) -> Option<InstId> {
        self.instrs.last().copied()
    }
}

#[derive(Clone, Debug)]
pub struct Function {
    pub(crate) name: String,
    pub(crate) value: ValueId,
    pub(crate) parameters: Vec<ValueId>,
    pub(crate) return_type: Ty,
    /// `None` for external declarations
    pub(crate) blocks: Option<Vec<Block>>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handle under which this function appears as an operand.
    pub fn value(&self) -> ValueId {
        self.value
    }

    pub fn parameters(&self) -> &[ValueId] {
        &self.parameters
    }

    pub fn return_type(&self) -> Ty {
        self.return_type
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_none()
    }

    /// Empty for declarations
    pub fn blocks(&self) -> &[Block] {
        match &self.blocks {
            Some(bs) => bs,
            None => &[],
        }
    }

    pub fn block(&self, b: BlockId) -> &Block {
        &self.blocks()[b.index()]
    }

    /// The first instruction of the entry block, whose IN state is the
    /// function's entry state.
    pub fn entry_instruction(&self) -> Option<InstId> {
        self.blocks().first().and_then(Block::first)
    }

    pub fn instructions(&self) -> impl Iterator<Item = InstId> + '_ {
        self.blocks().iter().flat_map(|b| b.instrs.iter().copied())
    }

    /// Blocks in postorder of a depth-first walk from the entry block,
    /// followed by any unreachable blocks in index order.
    pub fn postorder(&self) -> Vec<BlockId> {
        let blocks = self.blocks();
        let mut order = Vec::with_capacity(blocks.len());
        if blocks.is_empty() {
            return order;
        }
        let mut visited = vec![false; blocks.len()];
        // (block, index of next successor to visit)
        let mut stack: Vec<(BlockId, usize)> = vec![(BlockId::new(0), 0)];
        visited[0] = true;
        while let Some((b, next)) = stack.pop() {
            let succs = &blocks[b.index()].succs;
            if next < succs.len() {
                stack.push((b, next + 1));
                let s = succs[next];
                if !visited[s.index()] {
                    visited[s.index()] = true;
                    stack.push((s, 0));
                }
            } else {
                order.push(b);
            }
        }
        for (idx, seen) in visited.iter().enumerate() {
            if !seen {
                order.push(BlockId::new(idx));
            }
        }
        order
    }

    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut order = self.postorder();
        order.reverse();
        order
    }
}

/// Functions and globals a global holds before the program starts running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Initializer {
    pub global: ValueId,
    pub targets: Vec<ValueId>,
    /// Arrays and structs hold their targets in fields rather than directly.
    pub aggregate: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Module {
    pub(crate) values: Vec<ValueData>,
    pub(crate) functions: Vec<Function>,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) function_names: FxHashMap<String, FunctionId>,
    pub(crate) initializers: Vec<Initializer>,
}

impl Module {
    #[inline]
    pub fn value(&self, v: ValueId) -> &ValueData {
        &self.values[v.index()]
    }

    pub fn values(&self) -> impl Iterator<Item = (ValueId, &ValueData)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (ValueId::new(i), v))
    }

    pub fn initializers(&self) -> &[Initializer] {
        &self.initializers
    }

    #[inline]
    pub fn function(&self, f: FunctionId) -> &Function {
        &self.functions[f.index()]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId::new(i), f))
    }

    /// Functions with a body, in declaration order
    pub fn defined_functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.functions()
            .filter(|(_, f)| !f.is_declaration())
            .map(|(id, _)| id)
    }

    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.function_names.get(name).copied()
    }

    #[inline]
    pub fn instruction(&self, i: InstId) -> &Instruction {
        &self.instructions[i.index()]
    }

    pub fn instructions(&self) -> impl Iterator<Item = (InstId, &Instruction)> {
        self.instructions
            .iter()
            .enumerate()
            .map(|(i, inst)| (InstId::new(i), inst))
    }

    /// All call instructions, in module order
    pub fn call_sites(&self) -> impl Iterator<Item = InstId> + '_ {
        self.instructions()
            .filter(|(_, i)| matches!(i.opcode, Opcode::Call(_)))
            .map(|(id, _)| id)
    }

    #[inline]
    pub fn as_function(&self, v: ValueId) -> Option<FunctionId> {
        match self.value(v).kind {
            ValueKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// The instruction whose result is `v`, if `v` is a defined local.
    pub fn definition(&self, v: ValueId) -> Option<InstId> {
        match self.value(v).kind {
            ValueKind::Local { inst, .. } => inst,
            _ => None,
        }
    }

    pub fn defining_instruction(&self, v: ValueId) -> Option<&Instruction> {
        self.definition(v).map(|i| self.instruction(i))
    }

    /// Is `v` the result of a field access?
    pub fn is_field_access(&self, v: ValueId) -> bool {
        matches!(
            self.defining_instruction(v).map(|i| &i.opcode),
            Some(Opcode::GetElementPtr(_))
        )
    }

    /// Follow a chain of pointer reinterpretations back to the value that was
    /// reinterpreted.
    pub fn strip_casts(&self, v: ValueId) -> ValueId {
        let mut current = v;
        // Bounded in case unreachable code casts in a cycle
        for _ in 0..self.instructions.len() {
            match self.defining_instruction(current).map(|i| &i.opcode) {
                Some(Opcode::BitCast(b)) if b.pointer != current => current = b.pointer,
                _ => break,
            }
        }
        current
    }

    /// Human-readable name of the block containing `i`, e.g., `main:entry`
    pub fn location(&self, i: InstId) -> String {
        let inst = self.instruction(i);
        let f = self.function(inst.function);
        format!("{}:{}", f.name, f.block(inst.block).name)
    }
}

// SPDX-License-Identifier: BSD-3-Clause
//! Lowering of LLVM modules to [`ir::Module`]
//!
//! Only the instructions the analysis models keep their meaning; everything
//! else becomes [`Opcode::Other`], which preserves the defined value and
//! nothing more. Constant casts and constant `getelementptr` expressions are
//! reduced to the global or function they are built from.
//!
//! Calls to debug-info intrinsics (`llvm.dbg.*`) are dropped, and calls to
//! `llvm.memcpy.*`/`llvm.memmove.*` become [`Opcode::MemCpy`].
//!
//! Global initializers and alias targets are recorded as
//! [`ir::Initializer`]s; only the functions and globals they reference are
//! kept.

use either::Either;
use llvm_ir::types::{Typed, Types};
use llvm_ir::{HasDebugLoc, Name};
use rustc_hash::FxHashMap;

use crate::ir::instruction::{
    BitCast, Br, Call, GetElementPtr, Load, MemCpy, Opcode, Phi, Ret, Store,
};
use crate::ir::{self, BlockId, BodyBuilder, Error, ModuleBuilder, Ty, ValueId};

pub(crate) fn name_string(n: &Name) -> String {
    match n {
        Name::Name(s) => s.to_string(),
        Name::Number(n) => n.to_string(),
    }
}

fn ty(t: &llvm_ir::Type) -> Ty {
    match t {
        llvm_ir::Type::PointerType { .. } => Ty::Pointer,
        llvm_ir::Type::VoidType => Ty::Void,
        _ => Ty::Int,
    }
}

/// Name of the function a call targets directly, if any
fn direct_callee(op: &llvm_ir::Operand) -> Option<String> {
    match op {
        llvm_ir::Operand::ConstantOperand(c) => match c.as_ref() {
            llvm_ir::Constant::GlobalReference { name, .. } => Some(name_string(name)),
            llvm_ir::Constant::BitCast(b) => match b.operand.as_ref() {
                llvm_ir::Constant::GlobalReference { name, .. } => Some(name_string(name)),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

fn is_debug_intrinsic(name: &str) -> bool {
    name.starts_with("llvm.dbg.")
}

fn is_memcpy_intrinsic(name: &str) -> bool {
    name.starts_with("llvm.memcpy.") || name.starts_with("llvm.memmove.")
}

struct Lowering<'m, 'b> {
    function: &'m str,
    types: &'m Types,
    globals: &'m FxHashMap<String, ValueId>,
    body: BodyBuilder<'b>,
    blocks: FxHashMap<String, BlockId>,
}

impl Lowering<'_, '_> {
    fn constant(&mut self, c: &llvm_ir::Constant) -> Result<ValueId, Error> {
        match c {
            llvm_ir::Constant::GlobalReference { name, .. } => {
                let name = name_string(name);
                self.globals
                    .get(&name)
                    .copied()
                    .ok_or(Error::UnknownGlobal(name))
            }
            llvm_ir::Constant::BitCast(b) => self.constant(&b.operand),
            llvm_ir::Constant::AddrSpaceCast(a) => self.constant(&a.operand),
            llvm_ir::Constant::GetElementPtr(g) => self.constant(&g.address),
            llvm_ir::Constant::Null(_) => Ok(self.body.constant(Ty::Pointer)),
            llvm_ir::Constant::Int { .. } => Ok(self.body.constant(Ty::Int)),
            c => {
                let t = c.get_type(self.types);
                Ok(self.body.constant(ty(&t)))
            }
        }
    }

    fn operand(&mut self, op: &llvm_ir::Operand) -> Result<ValueId, Error> {
        match op {
            llvm_ir::Operand::LocalOperand { name, .. } => {
                let local = name_string(name);
                self.body.local(&local).ok_or_else(|| Error::UnknownLocal {
                    function: self.function.to_string(),
                    local,
                })
            }
            llvm_ir::Operand::ConstantOperand(c) => self.constant(c),
            llvm_ir::Operand::MetadataOperand => Ok(self.body.constant(Ty::Void)),
        }
    }

    fn block(&self, name: &Name) -> Result<BlockId, Error> {
        let name = name_string(name);
        self.blocks
            .get(&name)
            .copied()
            .ok_or_else(|| Error::UnknownBlock {
                function: self.function.to_string(),
                block: name,
            })
    }

    fn call<'a, Asm>(
        &mut self,
        function: &Either<Asm, llvm_ir::Operand>,
        arguments: impl Iterator<Item = &'a llvm_ir::Operand>,
    ) -> Result<Option<Opcode>, Error> {
        let callee = match function {
            Either::Left(_asm) => return Ok(Some(Opcode::Other)),
            Either::Right(op) => op,
        };
        let mut args = Vec::new();
        for a in arguments {
            args.push(self.operand(a)?);
        }
        if let Some(name) = direct_callee(callee) {
            if is_debug_intrinsic(&name) {
                return Ok(None);
            }
            if is_memcpy_intrinsic(&name) && args.len() >= 2 {
                return Ok(Some(Opcode::MemCpy(MemCpy {
                    dst: args[0],
                    src: args[1],
                })));
            }
        }
        Ok(Some(Opcode::Call(Call {
            callee: self.operand(callee)?,
            args,
        })))
    }

    /// `None` for instructions that are dropped entirely
    fn opcode(&mut self, i: &llvm_ir::Instruction) -> Result<Option<Opcode>, Error> {
        use llvm_ir::Instruction as I;
        Ok(Some(match i {
            I::Phi(p) => {
                let mut values = Vec::with_capacity(p.incoming_values.len());
                for (op, _) in &p.incoming_values {
                    values.push(self.operand(op)?);
                }
                Opcode::Phi(Phi { values })
            }
            I::Select(s) => Opcode::Phi(Phi {
                values: vec![self.operand(&s.true_value)?, self.operand(&s.false_value)?],
            }),
            I::Load(l) => Opcode::Load(Load {
                pointer: self.operand(&l.address)?,
            }),
            I::Store(s) => Opcode::Store(Store {
                value: self.operand(&s.value)?,
                pointer: self.operand(&s.address)?,
            }),
            I::GetElementPtr(g) => Opcode::GetElementPtr(GetElementPtr {
                pointer: self.operand(&g.address)?,
            }),
            I::BitCast(b) => Opcode::BitCast(BitCast {
                pointer: self.operand(&b.operand)?,
            }),
            I::AddrSpaceCast(a) => Opcode::BitCast(BitCast {
                pointer: self.operand(&a.operand)?,
            }),
            I::Call(c) => return self.call(&c.function, c.arguments.iter().map(|(op, _)| op)),
            _ => Opcode::Other,
        }))
    }

    fn define_or_emit(
        &mut self,
        block: BlockId,
        result: Option<&Name>,
        ty: Ty,
        opcode: Opcode,
        line: Option<u32>,
    ) -> Result<(), Error> {
        match result.and_then(|n| self.body.local(&name_string(n))) {
            Some(v) => {
                self.body.define(block, v, opcode, line)?;
            }
            None => {
                self.body.emit_at(block, ty, opcode, line);
            }
        }
        Ok(())
    }

    fn lower(&mut self, f: &llvm_ir::Function) -> Result<(), Error> {
        for b in &f.basic_blocks {
            let id = self.body.block(&name_string(&b.name));
            self.blocks.insert(name_string(&b.name), id);
        }
        // LLVM may use a value before (in block order) its definition
        for b in &f.basic_blocks {
            for i in &b.instrs {
                if let Some(n) = i.try_get_result() {
                    let t = i.get_type(self.types);
                    self.body.reserve(&name_string(n), ty(&t))?;
                }
            }
            if let llvm_ir::Terminator::Invoke(inv) = &b.term {
                let t = b.term.get_type(self.types);
                self.body.reserve(&name_string(&inv.result), ty(&t))?;
            }
        }

        for b in &f.basic_blocks {
            let block = self.block(&b.name)?;
            for i in &b.instrs {
                let line = i.get_debug_loc().as_ref().map(|d| d.line);
                let t = ty(&i.get_type(self.types));
                match self.opcode(i)? {
                    Some(opcode) => self.define_or_emit(block, i.try_get_result(), t, opcode, line)?,
                    // Dropped instructions never define anything the program uses
                    None => {
                        if let Some(n) = i.try_get_result() {
                            let v = self.body.local(&name_string(n));
                            if let Some(v) = v {
                                self.body.define(block, v, Opcode::Other, line)?;
                            }
                        }
                    }
                }
            }
            self.terminator(block, &b.term)?;
        }
        Ok(())
    }

    fn terminator(&mut self, block: BlockId, t: &llvm_ir::Terminator) -> Result<(), Error> {
        use llvm_ir::Terminator as T;
        let line = t.get_debug_loc().as_ref().map(|d| d.line);
        let targets = match t {
            T::Ret(r) => {
                let operand = match &r.return_operand {
                    Some(op) => Some(self.operand(op)?),
                    None => None,
                };
                self.body.emit_at(block, Ty::Void, Opcode::Ret(Ret { operand }), line);
                return Ok(());
            }
            T::Br(br) => vec![self.block(&br.dest)?],
            T::CondBr(br) => vec![self.block(&br.true_dest)?, self.block(&br.false_dest)?],
            T::Switch(s) => {
                let mut ts = vec![self.block(&s.default_dest)?];
                for (_, dest) in &s.dests {
                    ts.push(self.block(dest)?);
                }
                ts
            }
            T::IndirectBr(br) => {
                let mut ts = Vec::with_capacity(br.possible_dests.len());
                for dest in &br.possible_dests {
                    ts.push(self.block(dest)?);
                }
                ts
            }
            T::Invoke(inv) => {
                let t = ty(&t.get_type(self.types));
                let opcode = self
                    .call(&inv.function, inv.arguments.iter().map(|(op, _)| op))?
                    .unwrap_or(Opcode::Other);
                self.define_or_emit(block, Some(&inv.result), t, opcode, line)?;
                vec![
                    self.block(&inv.return_label)?,
                    self.block(&inv.exception_label)?,
                ]
            }
            _ => {
                self.body.emit_at(block, Ty::Void, Opcode::Other, line);
                return Ok(());
            }
        };
        self.body
            .emit_at(block, Ty::Void, Opcode::Br(Br { targets }), line);
        Ok(())
    }
}

/// Names of the functions and globals referenced anywhere in `c`
fn references(c: &llvm_ir::Constant, out: &mut Vec<String>) {
    use llvm_ir::Constant as C;
    match c {
        C::GlobalReference { name, .. } => out.push(name_string(name)),
        C::BitCast(b) => references(&b.operand, out),
        C::AddrSpaceCast(a) => references(&a.operand, out),
        C::GetElementPtr(g) => references(&g.address, out),
        C::Array { elements, .. } | C::Vector(elements) => {
            for e in elements {
                references(e, out);
            }
        }
        C::Struct { values, .. } => {
            for v in values {
                references(v, out);
            }
        }
        _ => {}
    }
}

fn initialize(
    mb: &mut ModuleBuilder,
    globals: &FxHashMap<String, ValueId>,
    global: &Name,
    c: &llvm_ir::Constant,
) {
    let Some(g) = globals.get(&name_string(global)).copied() else {
        return;
    };
    let mut names = Vec::new();
    references(c, &mut names);
    let targets: Vec<ValueId> = names.iter().filter_map(|n| globals.get(n).copied()).collect();
    let aggregate = matches!(
        c,
        llvm_ir::Constant::Array { .. } | llvm_ir::Constant::Struct { .. } | llvm_ir::Constant::Vector(_)
    );
    mb.initialize(g, targets, aggregate);
}

fn parameters(ps: &[llvm_ir::function::Parameter]) -> Vec<(String, Ty)> {
    ps.iter()
        .map(|p| (name_string(&p.name), ty(&p.ty)))
        .collect()
}

/// Lower an LLVM module.
pub fn lower(m: &llvm_ir::Module) -> Result<ir::Module, Error> {
    let mut mb = ModuleBuilder::new();
    for g in &m.global_vars {
        mb.global(&name_string(&g.name));
    }
    for g in &m.global_aliases {
        mb.global(&name_string(&g.name));
    }
    for d in &m.func_declarations {
        mb.declare_named(&d.name, &parameters(&d.parameters), ty(&d.return_type))?;
    }
    let mut defined = Vec::with_capacity(m.functions.len());
    for f in &m.functions {
        defined.push(mb.declare_named(&f.name, &parameters(&f.parameters), ty(&f.return_type))?);
    }
    let globals = mb.global_names();
    for g in &m.global_vars {
        if let Some(init) = &g.initializer {
            initialize(&mut mb, &globals, &g.name, init);
        }
    }
    for a in &m.global_aliases {
        initialize(&mut mb, &globals, &a.name, &a.aliasee);
    }
    for (f, id) in m.functions.iter().zip(defined) {
        let body = mb.body(id)?;
        Lowering {
            function: &f.name,
            types: &m.types,
            globals: &globals,
            body,
            blocks: FxHashMap::default(),
        }
        .lower(f)?;
    }
    mb.finish()
}

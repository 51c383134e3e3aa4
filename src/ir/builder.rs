// SPDX-License-Identifier: BSD-3-Clause
use rustc_hash::FxHashMap;

use super::instruction::{
    BitCast, Br, Call, GetElementPtr, Load, MemCpy, Opcode, Phi, Ret, Store,
};
use super::{
    Block, BlockId, Error, Function, FunctionId, Initializer, InstId, Instruction, Module, Ty,
    ValueData, ValueId, ValueKind,
};

/// Incrementally constructs a [`Module`].
///
/// Functions must be declared (with [`ModuleBuilder::declare`]) before they
/// are referenced, and can then be given a body with
/// [`ModuleBuilder::body`]. Functions that never get a body remain external
/// declarations.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
    globals: FxHashMap<String, ValueId>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_value(&mut self, data: ValueData) -> ValueId {
        let id = ValueId::new(self.module.values.len());
        self.module.values.push(data);
        id
    }

    /// Declare a function with parameters named `arg0`, `arg1`, ...
    pub fn declare(
        &mut self,
        name: &str,
        params: &[Ty],
        return_type: Ty,
    ) -> Result<FunctionId, Error> {
        let named: Vec<(String, Ty)> = params
            .iter()
            .enumerate()
            .map(|(i, ty)| (format!("arg{}", i), *ty))
            .collect();
        self.declare_named(name, &named, return_type)
    }

    pub fn declare_named<S: AsRef<str>>(
        &mut self,
        name: &str,
        params: &[(S, Ty)],
        return_type: Ty,
    ) -> Result<FunctionId, Error> {
        if self.module.function_names.contains_key(name) || self.globals.contains_key(name) {
            return Err(Error::DuplicateFunction(name.to_string()));
        }
        let f = FunctionId::new(self.module.functions.len());
        let value = self.push_value(ValueData::function(f, name));
        let mut parameters = Vec::with_capacity(params.len());
        for (index, (p_name, ty)) in params.iter().enumerate() {
            parameters.push(self.push_value(ValueData::parameter(
                f,
                name,
                p_name.as_ref(),
                index,
                *ty,
            )));
        }
        self.module.functions.push(Function {
            name: name.to_string(),
            value,
            parameters,
            return_type,
            blocks: None,
        });
        self.module.function_names.insert(name.to_string(), f);
        Ok(f)
    }

    /// Get or create the global variable `name`.
    pub fn global(&mut self, name: &str) -> ValueId {
        if let Some(g) = self.globals.get(name) {
            return *g;
        }
        let g = self.push_value(ValueData::global(name));
        self.globals.insert(name.to_string(), g);
        g
    }

    /// A fresh anonymous constant, e.g., an integer literal or `null`.
    pub fn constant(&mut self, ty: Ty) -> ValueId {
        self.module.push_constant(ty)
    }

    pub fn function_value(&self, f: FunctionId) -> ValueId {
        self.module.function(f).value
    }

    pub fn param(&self, f: FunctionId, idx: usize) -> ValueId {
        self.module.function(f).parameters[idx]
    }

    /// All functions and globals by name
    pub fn global_names(&self) -> FxHashMap<String, ValueId> {
        let mut names = self.globals.clone();
        for f in &self.module.functions {
            names.insert(f.name.clone(), f.value);
        }
        names
    }

    /// Record the static initializer of `global`. Targets that aren't
    /// functions or globals are ignored.
    pub fn initialize(
        &mut self,
        global: ValueId,
        targets: impl IntoIterator<Item = ValueId>,
        aggregate: bool,
    ) {
        let targets: Vec<ValueId> = targets
            .into_iter()
            .filter(|t| {
                matches!(
                    self.module.value(*t).kind,
                    ValueKind::Function(_) | ValueKind::Global
                )
            })
            .collect();
        if !targets.is_empty() {
            self.module.initializers.push(Initializer {
                global,
                targets,
                aggregate,
            });
        }
    }

    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.module.function_by_name(name)
    }

    /// Start the body of a declared function.
    pub fn body(&mut self, f: FunctionId) -> Result<BodyBuilder<'_>, Error> {
        let func = &mut self.module.functions[f.index()];
        if func.blocks.is_some() {
            return Err(Error::Redefinition(func.name.clone()));
        }
        func.blocks = Some(Vec::new());
        let mut locals = FxHashMap::default();
        let prefix = format!("{}:", func.name);
        for p in &func.parameters {
            let data = &self.module.values[p.index()];
            if let Some(local) = data.name.strip_prefix(&prefix) {
                locals.insert(local.to_string(), *p);
            }
        }
        Ok(BodyBuilder {
            module: &mut self.module,
            function: f,
            locals,
            anonymous: 0,
        })
    }

    /// Validate the module and compute predecessor edges.
    pub fn finish(mut self) -> Result<Module, Error> {
        for v in &self.module.values {
            if let ValueKind::Local { inst: None, .. } = v.kind {
                return Err(Error::UndefinedLocal(v.name.clone()));
            }
        }
        let Module {
            functions,
            instructions,
            ..
        } = &mut self.module;
        for func in functions.iter_mut() {
            let name = func.name.clone();
            let Some(blocks) = &mut func.blocks else {
                continue;
            };
            for b in blocks.iter_mut() {
                let last = b.instrs.last().ok_or_else(|| Error::EmptyBlock {
                    function: name.clone(),
                    block: b.name.clone(),
                })?;
                b.succs = match &instructions[last.index()].opcode {
                    Opcode::Br(br) => br.targets.clone(),
                    _ => Vec::new(),
                };
                b.preds.clear();
            }
            for idx in 0..blocks.len() {
                for s in blocks[idx].succs.clone() {
                    let preds = &mut blocks[s.index()].preds;
                    let p = BlockId::new(idx);
                    if !preds.contains(&p) {
                        preds.push(p);
                    }
                }
            }
        }
        Ok(self.module)
    }
}

impl Module {
    fn push_constant(&mut self, ty: Ty) -> ValueId {
        let id = ValueId::new(self.values.len());
        let name = match ty {
            Ty::Pointer => format!("<ptr constant {}>", id.0),
            Ty::Int => format!("<int constant {}>", id.0),
            Ty::Void => format!("<constant {}>", id.0),
        };
        self.values.push(ValueData::constant(name, ty));
        id
    }
}

/// Adds blocks and instructions to one function.
#[derive(Debug)]
pub struct BodyBuilder<'m> {
    module: &'m mut Module,
    function: FunctionId,
    locals: FxHashMap<String, ValueId>,
    anonymous: usize,
}

impl BodyBuilder<'_> {
    pub fn function(&self) -> FunctionId {
        self.function
    }

    fn func(&self) -> &Function {
        self.module.function(self.function)
    }

    fn blocks_mut(&mut self) -> &mut Vec<Block> {
        // `ModuleBuilder::body` installs the block vector
        self.module.functions[self.function.index()]
            .blocks
            .get_or_insert_with(Vec::new)
    }

    pub fn block(&mut self, name: &str) -> BlockId {
        let blocks = self.blocks_mut();
        let id = BlockId::new(blocks.len());
        blocks.push(Block {
            name: name.to_string(),
            ..Block::default()
        });
        id
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.func()
            .blocks()
            .iter()
            .position(|b| b.name == name)
            .map(BlockId::new)
    }

    /// A local named `name` (parameter or reserved instruction result).
    pub fn local(&self, name: &str) -> Option<ValueId> {
        self.locals.get(name).copied()
    }

    /// A fresh anonymous constant, e.g., an integer literal or `null`.
    pub fn constant(&mut self, ty: Ty) -> ValueId {
        self.module.push_constant(ty)
    }

    pub fn function_return_type(&self, name: &str) -> Option<Ty> {
        self.module
            .function_by_name(name)
            .map(|f| self.module.function(f).return_type)
    }

    /// Reserve a named local so it can be referenced before the instruction
    /// defining it is added (e.g., by a `phi` in a loop header).
    pub fn reserve(&mut self, name: &str, ty: Ty) -> Result<ValueId, Error> {
        if self.locals.contains_key(name) {
            let f_name = &self.func().name;
            return Err(Error::DuplicateLocal(format!("{}:{}", f_name, name)));
        }
        let data = ValueData::local(self.function, &self.func().name, name, ty);
        let v = ValueId::new(self.module.values.len());
        self.module.values.push(data);
        self.locals.insert(name.to_string(), v);
        Ok(v)
    }

    fn fresh(&mut self, ty: Ty) -> ValueId {
        loop {
            self.anonymous += 1;
            let name = self.anonymous.to_string();
            if !self.locals.contains_key(&name) {
                if let Ok(v) = self.reserve(&name, ty) {
                    return v;
                }
            }
        }
    }

    /// Attach a defining instruction to a reserved local.
    pub fn define(
        &mut self,
        block: BlockId,
        value: ValueId,
        opcode: Opcode,
        line: Option<u32>,
    ) -> Result<InstId, Error> {
        let f_name = self.func().name.clone();
        if block.index() >= self.func().blocks().len() {
            return Err(Error::UnknownBlock {
                function: f_name,
                block: block.index().to_string(),
            });
        }
        let undefined_here = matches!(
            self.module.value(value).kind,
            ValueKind::Local { function, inst: None } if function == self.function
        );
        if !undefined_here {
            return Err(Error::DuplicateLocal(self.module.value(value).name.clone()));
        }
        let inst = InstId::new(self.module.instructions.len());
        if let ValueKind::Local { inst: slot, .. } = &mut self.module.values[value.index()].kind {
            *slot = Some(inst);
        }
        self.module.instructions.push(Instruction {
            value,
            function: self.function,
            block,
            opcode,
            line,
        });
        self.blocks_mut()[block.index()].instrs.push(inst);
        Ok(inst)
    }

    /// Append an instruction with an anonymous result.
    pub fn emit(&mut self, block: BlockId, ty: Ty, opcode: Opcode) -> ValueId {
        self.emit_at(block, ty, opcode, None)
    }

    /// # Panics
    ///
    /// If `block` was not created by this builder.
    pub fn emit_at(
        &mut self,
        block: BlockId,
        ty: Ty,
        opcode: Opcode,
        line: Option<u32>,
    ) -> ValueId {
        let v = self.fresh(ty);
        if let Err(e) = self.define(block, v, opcode, line) {
            panic!("{}", e);
        }
        v
    }

    /// Stack allocation; modeled as an opaque object.
    pub fn alloca(&mut self, block: BlockId) -> ValueId {
        self.emit(block, Ty::Pointer, Opcode::Other)
    }

    pub fn load(&mut self, block: BlockId, pointer: ValueId) -> ValueId {
        self.emit(block, Ty::Pointer, Opcode::Load(Load { pointer }))
    }

    pub fn store(&mut self, block: BlockId, value: ValueId, pointer: ValueId) -> ValueId {
        self.emit(block, Ty::Void, Opcode::Store(Store { value, pointer }))
    }

    pub fn gep(&mut self, block: BlockId, pointer: ValueId) -> ValueId {
        self.emit(
            block,
            Ty::Pointer,
            Opcode::GetElementPtr(GetElementPtr { pointer }),
        )
    }

    pub fn bitcast(&mut self, block: BlockId, pointer: ValueId) -> ValueId {
        self.emit(block, Ty::Pointer, Opcode::BitCast(BitCast { pointer }))
    }

    pub fn memcpy(&mut self, block: BlockId, dst: ValueId, src: ValueId) -> ValueId {
        self.emit(block, Ty::Void, Opcode::MemCpy(MemCpy { dst, src }))
    }

    pub fn phi(&mut self, block: BlockId, values: Vec<ValueId>) -> ValueId {
        self.emit(block, Ty::Pointer, Opcode::Phi(Phi { values }))
    }

    pub fn call(&mut self, block: BlockId, callee: ValueId, args: Vec<ValueId>) -> ValueId {
        self.call_at(block, callee, args, None)
    }

    /// A call whose result type is the direct callee's return type, or a
    /// pointer for indirect calls.
    pub fn call_at(
        &mut self,
        block: BlockId,
        callee: ValueId,
        args: Vec<ValueId>,
        line: Option<u32>,
    ) -> ValueId {
        let ty = match self.module.as_function(callee) {
            Some(f) => self.module.function(f).return_type,
            None => Ty::Pointer,
        };
        self.emit_at(block, ty, Opcode::Call(Call { callee, args }), line)
    }

    pub fn ret(&mut self, block: BlockId, operand: Option<ValueId>) -> ValueId {
        self.emit(block, Ty::Void, Opcode::Ret(Ret { operand }))
    }

    pub fn br(&mut self, block: BlockId, targets: &[BlockId]) -> ValueId {
        self.emit(
            block,
            Ty::Void,
            Opcode::Br(Br {
                targets: targets.to_vec(),
            }),
        )
    }
}

// SPDX-License-Identifier: BSD-3-Clause
//! A JSON description of a program, for feeding the analysis without going
//! through LLVM.
//!
//! ```json
//! {
//!   "declarations": [{ "name": "puts", "params": [{ "name": "s" }] }],
//!   "functions": [{
//!     "name": "main",
//!     "ret": "int",
//!     "blocks": [{
//!       "name": "entry",
//!       "instrs": [
//!         { "name": "fp", "op": "alloca" },
//!         { "op": "store", "value": "@puts", "pointer": "%fp" },
//!         { "name": "f", "op": "load", "pointer": "%fp" },
//!         { "op": "call", "callee": "%f", "args": ["null"], "line": 4 },
//!         { "op": "ret", "value": "0" }
//!       ]
//!     }]
//!   }]
//! }
//! ```
//!
//! Operands are strings: `%x` names a parameter or instruction of the
//! enclosing function, `@f` a function or global, `null` a null pointer, and
//! anything else an integer constant.

use rustc_hash::FxHashMap;

use super::instruction::{
    BitCast, Br, Call, GetElementPtr, Load, MemCpy, Opcode, Phi, Ret, Store,
};
use super::{BodyBuilder, Error, Module, ModuleBuilder, Ty, ValueId};

fn pointer() -> Ty {
    Ty::Pointer
}

fn void() -> Ty {
    Ty::Void
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct Param {
    pub name: String,
    #[serde(default = "pointer")]
    pub ty: Ty,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct Declaration {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default = "void")]
    pub ret: Ty,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct Definition {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default = "void")]
    pub ret: Ty,
    pub blocks: Vec<BlockDef>,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct BlockDef {
    pub name: String,
    pub instrs: Vec<InstrDef>,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct InstrDef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ty: Option<Ty>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(flatten)]
    pub op: OpDef,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum OpDef {
    Alloca,
    Load {
        pointer: String,
    },
    Store {
        value: String,
        pointer: String,
    },
    Gep {
        pointer: String,
    },
    Bitcast {
        pointer: String,
    },
    Memcpy {
        dst: String,
        src: String,
    },
    Phi {
        values: Vec<String>,
    },
    Call {
        callee: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Ret {
        #[serde(default)]
        value: Option<String>,
    },
    Br {
        targets: Vec<String>,
    },
    Other,
}

/// Static contents of a global: `@f` operands naming functions or globals
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct InitializerDef {
    pub global: String,
    pub values: Vec<String>,
    #[serde(default)]
    pub aggregate: bool,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct Program {
    #[serde(default)]
    pub globals: Vec<String>,
    #[serde(default)]
    pub initializers: Vec<InitializerDef>,
    #[serde(default)]
    pub declarations: Vec<Declaration>,
    #[serde(default)]
    pub functions: Vec<Definition>,
}

impl Program {
    pub fn parse(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s).map_err(|e| Error::Other(format!("invalid JSON program: {}", e)))
    }

    pub fn to_module(&self) -> Result<Module, Error> {
        let mut mb = ModuleBuilder::new();
        for g in &self.globals {
            mb.global(g);
        }
        for d in &self.declarations {
            mb.declare_named(&d.name, &params(&d.params), d.ret)?;
        }
        let mut defined = Vec::with_capacity(self.functions.len());
        for d in &self.functions {
            defined.push(mb.declare_named(&d.name, &params(&d.params), d.ret)?);
        }
        let globals = mb.global_names();
        for init in &self.initializers {
            let global = lookup(&globals, &init.global)?;
            let mut targets = Vec::with_capacity(init.values.len());
            for v in &init.values {
                targets.push(lookup(&globals, v)?);
            }
            mb.initialize(global, targets, init.aggregate);
        }
        for (def, f) in self.functions.iter().zip(defined) {
            let mut body = mb.body(f)?;
            Lowering {
                def,
                globals: &globals,
                body: &mut body,
            }
            .lower()?;
        }
        mb.finish()
    }
}

fn lookup(globals: &FxHashMap<String, ValueId>, s: &str) -> Result<ValueId, Error> {
    let name = s.strip_prefix('@').unwrap_or(s);
    globals
        .get(name)
        .copied()
        .ok_or_else(|| Error::UnknownGlobal(name.to_string()))
}

fn params(ps: &[Param]) -> Vec<(&str, Ty)> {
    ps.iter().map(|p| (p.name.as_str(), p.ty)).collect()
}

struct Lowering<'a, 'm> {
    def: &'a Definition,
    globals: &'a FxHashMap<String, ValueId>,
    body: &'a mut BodyBuilder<'m>,
}

impl Lowering<'_, '_> {
    fn default_ty(&self, op: &OpDef) -> Ty {
        match op {
            OpDef::Alloca
            | OpDef::Load { .. }
            | OpDef::Gep { .. }
            | OpDef::Bitcast { .. }
            | OpDef::Phi { .. } => Ty::Pointer,
            OpDef::Call { callee, .. } => callee
                .strip_prefix('@')
                .and_then(|name| self.body.function_return_type(name))
                .unwrap_or(Ty::Pointer),
            OpDef::Store { .. }
            | OpDef::Memcpy { .. }
            | OpDef::Ret { .. }
            | OpDef::Br { .. }
            | OpDef::Other => Ty::Void,
        }
    }

    fn operand(&mut self, s: &str) -> Result<ValueId, Error> {
        if let Some(local) = s.strip_prefix('%') {
            self.body.local(local).ok_or_else(|| Error::UnknownLocal {
                function: self.def.name.clone(),
                local: local.to_string(),
            })
        } else if let Some(global) = s.strip_prefix('@') {
            self.globals
                .get(global)
                .copied()
                .ok_or_else(|| Error::UnknownGlobal(global.to_string()))
        } else if s == "null" {
            Ok(self.body.constant(Ty::Pointer))
        } else {
            Ok(self.body.constant(Ty::Int))
        }
    }

    fn operands(&mut self, ss: &[String]) -> Result<Vec<ValueId>, Error> {
        ss.iter().map(|s| self.operand(s)).collect()
    }

    fn opcode(&mut self, op: &OpDef) -> Result<Opcode, Error> {
        Ok(match op {
            OpDef::Alloca => Opcode::Other,
            OpDef::Load { pointer } => Opcode::Load(Load {
                pointer: self.operand(pointer)?,
            }),
            OpDef::Store { value, pointer } => Opcode::Store(Store {
                value: self.operand(value)?,
                pointer: self.operand(pointer)?,
            }),
            OpDef::Gep { pointer } => Opcode::GetElementPtr(GetElementPtr {
                pointer: self.operand(pointer)?,
            }),
            OpDef::Bitcast { pointer } => Opcode::BitCast(BitCast {
                pointer: self.operand(pointer)?,
            }),
            OpDef::Memcpy { dst, src } => Opcode::MemCpy(MemCpy {
                dst: self.operand(dst)?,
                src: self.operand(src)?,
            }),
            OpDef::Phi { values } => Opcode::Phi(Phi {
                values: self.operands(values)?,
            }),
            OpDef::Call { callee, args } => Opcode::Call(Call {
                callee: self.operand(callee)?,
                args: self.operands(args)?,
            }),
            OpDef::Ret { value } => Opcode::Ret(Ret {
                operand: match value {
                    Some(v) => Some(self.operand(v)?),
                    None => None,
                },
            }),
            OpDef::Br { targets } => {
                let mut ts = Vec::with_capacity(targets.len());
                for t in targets {
                    ts.push(
                        self.body
                            .block_by_name(t)
                            .ok_or_else(|| Error::UnknownBlock {
                                function: self.def.name.clone(),
                                block: t.clone(),
                            })?,
                    );
                }
                Opcode::Br(Br { targets: ts })
            }
            OpDef::Other => Opcode::Other,
        })
    }

    fn lower(&mut self) -> Result<(), Error> {
        let def = self.def;
        // Blocks and named results first: both may be referenced before
        // they appear.
        let mut blocks = Vec::with_capacity(def.blocks.len());
        for b in &def.blocks {
            blocks.push(self.body.block(&b.name));
        }
        let mut named = FxHashMap::default();
        for b in &def.blocks {
            for i in &b.instrs {
                if let Some(name) = &i.name {
                    let ty = i.ty.unwrap_or_else(|| self.default_ty(&i.op));
                    named.insert(name.as_str(), self.body.reserve(name, ty)?);
                }
            }
        }
        for (b, block) in def.blocks.iter().zip(blocks) {
            for i in &b.instrs {
                let opcode = self.opcode(&i.op)?;
                match i.name.as_deref().and_then(|n| named.get(n)) {
                    Some(v) => {
                        self.body.define(block, *v, opcode, i.line)?;
                    }
                    None => {
                        let ty = i.ty.unwrap_or_else(|| self.default_ty(&i.op));
                        self.body.emit_at(block, ty, opcode, i.line);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Module {
    /// Parse and build a module from its JSON description.
    pub fn from_json(s: &str) -> Result<Self, Error> {
        Program::parse(s)?.to_module()
    }
}

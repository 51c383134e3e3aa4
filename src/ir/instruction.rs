// SPDX-License-Identifier: BSD-3-Clause
use super::name::{BlockId, ValueId};

/// Selects among values flowing in from different predecessors.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Phi {
    pub values: Vec<ValueId>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Load {
    pub pointer: ValueId,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Store {
    pub value: ValueId,
    pub pointer: ValueId,
}

/// Pointer to a sub-object of `pointer`; never dereferences.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct GetElementPtr {
    pub pointer: ValueId,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct BitCast {
    pub pointer: ValueId,
}

/// Bulk copy of the object behind `src` into the object behind `dst`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct MemCpy {
    pub dst: ValueId,
    pub src: ValueId,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Call {
    pub callee: ValueId,
    pub args: Vec<ValueId>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Ret {
    pub operand: Option<ValueId>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Br {
    pub targets: Vec<BlockId>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Opcode {
    Phi(Phi),
    Load(Load),
    Store(Store),
    GetElementPtr(GetElementPtr),
    BitCast(BitCast),
    MemCpy(MemCpy),
    Call(Call),
    Ret(Ret),
    Br(Br),
    //
    Other,
}

impl Opcode {
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Opcode::Phi(p) => p.values.clone(),
            Opcode::Load(l) => vec![l.pointer],
            Opcode::Store(s) => vec![s.value, s.pointer],
            Opcode::GetElementPtr(g) => vec![g.pointer],
            Opcode::BitCast(b) => vec![b.pointer],
            Opcode::MemCpy(m) => vec![m.dst, m.src],
            Opcode::Call(c) => {
                let mut ops = vec![c.callee];
                ops.extend(c.args.iter().copied());
                ops
            }
            Opcode::Ret(r) => r.operand.into_iter().collect(),
            Opcode::Br(_) => vec![],
            //
            Opcode::Other => vec![],
        }
    }

    pub(crate) fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Phi(_) => "phi",
            Opcode::Load(_) => "load",
            Opcode::Store(_) => "store",
            Opcode::GetElementPtr(_) => "getelementptr",
            Opcode::BitCast(_) => "bitcast",
            Opcode::MemCpy(_) => "memcpy",
            Opcode::Call(_) => "call",
            Opcode::Ret(_) => "ret",
            Opcode::Br(_) => "br",
            Opcode::Other => "other",
        }
    }
}

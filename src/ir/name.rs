// SPDX-License-Identifier: BSD-3-Clause
use std::fmt::Display;

use super::Ty;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, serde::Serialize,
        )]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Panics if `idx` doesn't fit in a `u32`.
            #[inline]
            pub(crate) fn new(idx: usize) -> Self {
                match u32::try_from(idx) {
                    Ok(i) => $name(i),
                    Err(_) => panic!(
                        "{} arena overflow: index {} does not fit in u32",
                        stringify!($name),
                        idx
                    ),
                }
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Identity of one IR entity: an instruction result, a parameter, a
    /// function, a global or a constant. Two handles are equal iff they name
    /// the same entity.
    ValueId
);
arena_id!(FunctionId);
arena_id!(
    /// Global index of an instruction in its [`super::Module`].
    InstId
);
arena_id!(
    /// Index of a block within its parent function.
    BlockId
);

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ValueKind {
    Function(FunctionId),
    Parameter {
        function: FunctionId,
        index: usize,
    },
    /// `inst` is `None` while the local is reserved but not yet defined.
    Local {
        function: FunctionId,
        inst: Option<InstId>,
    },
    Global,
    Constant,
}

#[derive(Clone, Debug)]
pub struct ValueData {
    pub(crate) name: String,
    pub(crate) kind: ValueKind,
    pub(crate) ty: Ty,
}

impl ValueData {
    pub(crate) fn function(f: FunctionId, name: &str) -> Self {
        ValueData {
            name: format!("@{}", name),
            kind: ValueKind::Function(f),
            ty: Ty::Pointer,
        }
    }

    pub(crate) fn global(name: &str) -> Self {
        ValueData {
            name: format!("@{}", name),
            kind: ValueKind::Global,
            ty: Ty::Pointer,
        }
    }

    pub(crate) fn parameter(
        f: FunctionId,
        f_name: &str,
        p_name: &str,
        index: usize,
        ty: Ty,
    ) -> Self {
        ValueData {
            name: format!("{}:{}", f_name, p_name),
            kind: ValueKind::Parameter { function: f, index },
            ty,
        }
    }

    // reduce heap allocations by precomputing string size
    pub(crate) fn local(f: FunctionId, f_name: &str, local: &str, ty: Ty) -> Self {
        let mut name = String::with_capacity(
            f_name.len()
            + 1 // :
            + local.len(),
        );
        name += f_name;
        name += ":";
        name += local;
        ValueData {
            name,
            kind: ValueKind::Local {
                function: f,
                inst: None,
            },
            ty,
        }
    }

    pub(crate) fn constant(name: String, ty: Ty) -> Self {
        ValueData {
            name,
            kind: ValueKind::Constant,
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn ty(&self) -> Ty {
        self.ty
    }

    pub fn is_pointer(&self) -> bool {
        self.ty.is_pointer()
    }
}

impl Display for ValueData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::ValueId;

    #[test]
    fn ids_round_trip() {
        assert_eq!(ValueId::new(7).index(), 7);
        assert_eq!(ValueId::new(u32::MAX as usize).index(), u32::MAX as usize);
    }

    #[test]
    #[should_panic(expected = "ValueId arena overflow")]
    fn arena_overflow_aborts() {
        ValueId::new(u32::MAX as usize + 1);
    }
}

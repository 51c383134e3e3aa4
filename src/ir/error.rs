// SPDX-License-Identifier: BSD-3-Clause
#[derive(Clone, Debug, Hash, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Malformed program: function @{0} is declared twice")]
    DuplicateFunction(String),
    #[error("Malformed program: function @{0} already has a body")]
    Redefinition(String),
    #[error("Malformed program: unknown function or global @{0}")]
    UnknownGlobal(String),
    #[error("Malformed program: unknown local %{local} in @{function}")]
    UnknownLocal { function: String, local: String },
    #[error("Malformed program: unknown block {block} in @{function}")]
    UnknownBlock { function: String, block: String },
    #[error("Malformed program: {0} is used but never defined")]
    UndefinedLocal(String),
    #[error("Malformed program: {0} is defined twice")]
    DuplicateLocal(String),
    #[error("Malformed program: block {block} of @{function} has no instructions")]
    EmptyBlock { function: String, block: String },
    #[error("Malformed program: {0}")]
    Other(String),
}

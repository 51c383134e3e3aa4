// SPDX-License-Identifier: BSD-3-Clause
pub mod binder;
pub mod callgraph;
pub mod pointer;

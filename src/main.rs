// SPDX-License-Identifier: BSD-3-Clause
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use tracing_flame::{FlameLayer, FlushGuard};
use tracing_subscriber::{fmt, prelude::*};

use funptr::{ir, layers, pointer};

mod cli;

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

fn setup_global_subscriber() -> Result<FlushGuard<BufWriter<File>>> {
    let filter_layer = tracing::level_filters::LevelFilter::TRACE;
    let fmt_layer = fmt::Layer::default().with_writer(io::stderr);
    let (flame_layer, guard) = FlameLayer::with_file("./tracing.folded")
        .context("Couldn't create ./tracing.folded")?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(flame_layer)
        .with(layers::SpanTimingLayer)
        .init();
    Ok(guard)
}

#[cfg(feature = "llvm")]
fn load_llvm(path: &Path) -> Result<ir::Module> {
    let llvm_module = llvm_ir::Module::from_bc_path(path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("Couldn't parse LLVM bitcode module at {}", path.display()))?;
    funptr::llvm::lower(&llvm_module).context("Malformed LLVM module")
}

#[cfg(not(feature = "llvm"))]
fn load_llvm(path: &Path) -> Result<ir::Module> {
    anyhow::bail!(
        "Can't read {}: built without the `llvm` feature (try --format json)",
        path.display()
    )
}

fn load(path: &Path, format: cli::Format) -> Result<ir::Module> {
    match format {
        cli::Format::Json => {
            let s = std::fs::read_to_string(path)
                .with_context(|| format!("Couldn't read {}", path.display()))?;
            ir::Module::from_json(&s)
                .with_context(|| format!("Couldn't load JSON program at {}", path.display()))
        }
        cli::Format::Llvm => load_llvm(path),
    }
}

fn main() -> Result<()> {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    let args = cli::Args::parse();

    let _guard = if args.tracing {
        Some(setup_global_subscriber()?)
    } else {
        None
    };

    let format = args
        .format
        .unwrap_or_else(|| cli::Format::guess(&args.module));
    let module = load(&args.module, format)?;

    let opts = pointer::Options {
        debug: args.debug,
        metrics: args.metrics,
        max_dequeues: args.max_dequeues,
    };
    let outs = pointer::analysis(&module, &opts)
        .with_context(|| format!("Analysis of {} failed", args.module.display()))?;

    let mut stdout = io::stdout().lock();
    if !args.quiet {
        let report = outs.report(&module);
        if args.json {
            serde_json::to_writer_pretty(&mut stdout, &report)?;
            writeln!(stdout)?;
        } else {
            for line in &report {
                writeln!(stdout, "{}", line)?;
            }
        }
    }

    if let Some(m) = outs.metrics {
        if args.json {
            serde_json::to_writer_pretty(&mut stdout, &m)?;
            writeln!(stdout)?;
        } else {
            writeln!(stdout)?;
            writeln!(stdout, "metrics")?;
            writeln!(stdout, "-------")?;
            writeln!(stdout, "dequeues: {}", m.dequeues)?;
            writeln!(stdout, "passes: {}", m.passes)?;
            writeln!(stdout, "call sites: {}", m.call_sites)?;
            writeln!(stdout, "callgraph size: {}", m.callgraph_size)?;
            writeln!(stdout, "indirect call sites: {}", m.indirect_sites)?;
            writeln!(stdout, "unresolved call sites: {}", m.unresolved_sites)?;
            writeln!(stdout, "largest state: {}", m.largest_state)?;
        }
    }

    Ok(())
}

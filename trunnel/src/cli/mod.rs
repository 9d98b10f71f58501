//! Command-line surface: argument parsing and the compile loop.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info};

use crate::services::emitter::boilerplate;

#[derive(Parser, Debug)]
#[command(
    name = "trunnel",
    version,
    about = "Generate C parsers and encoders for binary wire formats"
)]
pub struct Args {
    /// Extra code-generation options, as if the schema contained a
    /// "trunnel options" line (e.g. -O opaque)
    #[arg(short = 'O', long = "option", value_name = "OPT")]
    pub options: Vec<String>,

    /// Directory to write generated files into (default: next to each
    /// schema)
    #[arg(long, value_name = "DIR")]
    pub target_dir: Option<PathBuf>,

    /// Also write the runtime support files (trunnel.h, trunnel-impl.h,
    /// trunnel.c) into the target directory
    #[arg(long)]
    pub write_c_files: bool,

    /// Fail unless this trunnel is at least the given version
    #[arg(long, value_name = "VERSION")]
    pub require_version: Option<String>,

    /// Print each schema's checked, annotated AST as JSON instead of
    /// generating C
    #[arg(long)]
    pub dump_ast: bool,

    /// Enable info-level logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable debug-level logging
    #[arg(long)]
    pub debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    pub trace: bool,

    /// Schema files to compile
    #[arg(value_name = "SCHEMA")]
    pub schemas: Vec<PathBuf>,
}

pub fn run(args: Args) -> Result<()> {
    if let Some(wanted) = &args.require_version {
        require_version(boilerplate::VERSION, wanted)?;
    }
    if args.schemas.is_empty() && !args.write_c_files && args.require_version.is_none() {
        bail!("no input files; try 'trunnel --help'");
    }
    for schema in &args.schemas {
        compile_file(schema, &args)?;
    }
    if args.write_c_files {
        let dir = args
            .target_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        boilerplate::write_runtime_files(&dir)
            .with_context(|| format!("writing runtime files to {}", dir.display()))?;
        info!("wrote runtime files to {}", dir.display());
    }
    Ok(())
}

fn compile_file(path: &Path, args: &Args) -> Result<()> {
    debug!("compiling {}", path.display());
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;

    if args.dump_ast {
        let (file, _) = crate::analyze(&text, &args.options)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        println!("{}", serde_json::to_string_pretty(&file)?);
        return Ok(());
    }

    let basename = output_basename(path, args.target_dir.as_deref());
    let stem = basename
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let compiled = crate::compile(&text, &stem, &args.options)
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;

    let h_path = PathBuf::from(format!("{}.h", basename.display()));
    let c_path = PathBuf::from(format!("{}.c", basename.display()));
    if let Some(parent) = h_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&h_path, &compiled.header)
        .with_context(|| format!("cannot write {}", h_path.display()))?;
    std::fs::write(&c_path, &compiled.module)
        .with_context(|| format!("cannot write {}", c_path.display()))?;
    info!("{} -> {}, {}", path.display(), h_path.display(), c_path.display());
    Ok(())
}

/// Output path stem for a schema: the input path with any `.trunnel`
/// suffix removed, relocated into the target directory when one was
/// given.
fn output_basename(input: &Path, target_dir: Option<&Path>) -> PathBuf {
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = name.strip_suffix(".trunnel").unwrap_or(name);
    match target_dir {
        Some(dir) => dir.join(stem),
        None => input.with_file_name(stem),
    }
}

/// Dotted-version comparison in the schema-author's favor: numeric
/// components compare numerically, anything else lexically.
fn require_version(mine: &str, wanted: &str) -> Result<()> {
    let split = |v: &str| -> Vec<String> { v.split('.').map(str::to_string).collect() };
    let mine_parts = split(mine);
    let wanted_parts = split(wanted);
    for i in 0..mine_parts.len().max(wanted_parts.len()) {
        let a = mine_parts.get(i).map(String::as_str).unwrap_or("0");
        let b = wanted_parts.get(i).map(String::as_str).unwrap_or("0");
        let ord = match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        };
        match ord {
            std::cmp::Ordering::Less => {
                bail!("I'm trunnel {mine}; you asked for {wanted}")
            }
            std::cmp::Ordering::Greater => return Ok(()),
            std::cmp::Ordering::Equal => {}
        }
    }
    Ok(())
}

//! # yulangc
//!
//! The command-line front door for the lowering engine. It does not parse
//! source text — upstream of this crate, a parser is assumed to have already
//! produced a `Program` and serialized it as `<input>.ast.json`. This binary
//! loads that file, recursively resolves any `import`ed sibling modules the
//! same way, and hands both to
//! [`yulang_irgen::orchestrator::ModuleOrchestrator::lower_program`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use log::{debug, info};

use yulang_irgen::ast::{Program, TopLevelItem};
use yulang_irgen::config::{Config, Target};
use yulang_irgen::orchestrator::ModuleOrchestrator;

/// CLI configuration for yulangc.
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Specify the log level of the compiler.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    verbosity: LogLevel,
}

impl Cli {
    fn init() -> Self {
        Cli::parse()
    }
}

/// Log level, mirroring the numeric aliases the `why` binary accepts
/// (`-v 0`..`-v 4`).
#[derive(ValueEnum, Clone, Default, Debug)]
enum LogLevel {
    #[default]
    #[value(alias("0"))]
    Error,
    #[value(alias("1"))]
    Warn,
    #[value(alias("2"))]
    Info,
    #[value(alias("3"))]
    Debug,
    #[value(alias("4"))]
    Trace,
}

impl From<&LogLevel> for log::Level {
    fn from(value: &LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Lower an AST-JSON file to LLVM IR text.
    Build(BuildArgs),
}

#[derive(Args, Debug, Clone)]
struct BuildArgs {
    /// Path to the `.ast.json` file to lower.
    #[arg(index = 1)]
    file: PathBuf,

    /// Target triple family to emit for.
    #[arg(short, long, default_value = "x86_64")]
    target: Target,

    /// Enable the `_prog_`-prefixed mangling scheme for plain top-level names.
    #[arg(long)]
    prog_mangling: bool,

    /// Where to write the emitted `.ll` text. Printed to stdout if omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    let cli = Cli::init();
    simple_logger::init_with_level((&cli.verbosity).into()).unwrap();

    let result = match cli.command {
        Commands::Build(args) => build(args),
    };

    if let Err(err) = result {
        eprintln!("{}", format!("{err:#}").red());
        std::process::exit(1);
    }
}

fn build(args: BuildArgs) -> Result<()> {
    let file = fs::canonicalize(&args.file)
        .with_context(|| format!("locating input file `{}`", args.file.display()))?;

    info!("lowering {}", file.display());

    let program = load_program(&file)?;

    let base_dir = file.parent().unwrap_or_else(|| Path::new("."));
    let mut registry = HashMap::new();
    load_imports(base_dir, &program.items, &mut registry)?;

    let config = Config { target: args.target, prog_mangling_enabled: args.prog_mangling };
    let platform = config.target.platform();

    let ir = ModuleOrchestrator::lower_program(
        &program,
        platform.as_ref(),
        &config,
        &file.to_string_lossy(),
        registry,
    )
    .with_context(|| format!("lowering `{}`", file.display()))?;

    match args.output {
        Some(path) => {
            fs::write(&path, &ir)
                .with_context(|| format!("writing output to `{}`", path.display()))?;
            info!("wrote {}", path.display());
        }
        None => println!("{ir}"),
    }

    Ok(())
}

/// Loads the top-level `Program` from an `.ast.json` file.
fn load_program(path: &Path) -> Result<Program> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading `{}`", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing `{}` as AST JSON", path.display()))
}

/// Loads just the item list of an imported module's `.ast.json` file — the
/// registry stores flat item lists keyed by import path, not a `Program`.
fn load_items(path: &Path) -> Result<Vec<TopLevelItem>> {
    Ok(load_program(path)?.items)
}

/// Recursively resolves every `import` reachable from `items`, in the
/// manner of `loader::load_modules`'s DFS: imports are resolved
/// relative to the directory of the file that names them, and a module
/// already present in the registry is not reloaded (this is also what
/// breaks import cycles at the filesystem level, ahead of
/// `ModuleObjectBuilder`'s own in-memory cycle guard).
fn load_imports(
    base_dir: &Path,
    items: &[TopLevelItem],
    registry: &mut HashMap<String, Vec<TopLevelItem>>,
) -> Result<()> {
    for item in items {
        if let TopLevelItem::Import(import) = item {
            if registry.contains_key(&import.path) {
                continue;
            }
            let module_file = base_dir.join(format!("{}.ast.json", import.path));
            debug!("loading imported module `{}` from {}", import.path, module_file.display());
            let module_items = load_items(&module_file)
                .with_context(|| format!("loading import `{}`", import.path))?;
            registry.insert(import.path.clone(), module_items.clone());
            let module_dir = module_file.parent().unwrap_or(base_dir);
            load_imports(module_dir, &module_items, registry)?;
        }
    }
    Ok(())
}

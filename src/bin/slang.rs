//! `slang`: compile and run Slang modules, and manage the package store.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use slang::module::archive;
use slang::pkg::{PackageStore, PathSearchLoader};
use slang::resolver::ModuleLoader;
use slang::vm::{Interpreter, Value};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "slang", version, about = "Slang compiler and bytecode interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the package store.
    #[command(subcommand)]
    Pkg(PkgCommand),

    /// Compile a `.sl` source file to a `.cmod` module.
    Compile {
        module: PathBuf,
        #[arg(short = 'o')]
        out: Option<PathBuf>,
        #[arg(long = "search-path")]
        search_path: Vec<PathBuf>,
        #[arg(long)]
        no_lang: bool,
        #[arg(long)]
        no_eval_const_subexpr: bool,
        #[arg(long)]
        verbose: bool,
    },

    /// Load and run a compiled `.cmod` module.
    Exec {
        module: PathBuf,
        #[arg(long)]
        disasm: bool,
        #[arg(long)]
        verbose: bool,
        #[arg(long = "search-path")]
        search_path: Vec<PathBuf>,
        #[arg(long)]
        no_lang: bool,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
enum PkgCommand {
    /// Create an empty package directory.
    Create { name: String },
    /// Print the package store's root directory and package count.
    Info,
    /// Enumerate known packages.
    List {
        #[arg(long)]
        all: bool,
    },
    /// Remove a package; protected names (`std`) require `--protected`.
    Remove {
        name: String,
        #[arg(long)]
        protected: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = matches!(
        &cli.command,
        Command::Compile { verbose: true, .. } | Command::Exec { verbose: true, .. }
    );
    init_tracing(verbose);

    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "slang=debug" } else { "slang=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Command) -> slang::Result<ExitCode> {
    match command {
        Command::Pkg(pkg) => run_pkg(pkg),
        Command::Compile {
            module,
            out,
            search_path,
            no_lang,
            no_eval_const_subexpr,
            verbose: _,
        } => run_compile(&module, out, search_path, no_lang, no_eval_const_subexpr),
        Command::Exec {
            module,
            disasm,
            verbose: _,
            search_path,
            no_lang,
            args,
        } => run_exec(&module, disasm, search_path, no_lang, args),
    }
}

fn run_pkg(command: PkgCommand) -> slang::Result<ExitCode> {
    let store = PackageStore::new(PackageStore::default_root());
    match command {
        PkgCommand::Create { name } => {
            store.create(&name)?;
            println!("created package '{name}'");
        }
        PkgCommand::Info => {
            let (root, count) = store.describe()?;
            println!("package root: {}", root.display());
            println!("packages: {count}");
        }
        PkgCommand::List { all } => {
            for package in store.list(all)? {
                println!(
                    "{} ({} source, {} compiled)",
                    package.name,
                    package.source_files.len(),
                    package.compiled_files.len()
                );
            }
        }
        PkgCommand::Remove { name, protected } => {
            store.remove(&name, protected)?;
            println!("removed package '{name}'");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_compile(
    module: &Path,
    out: Option<PathBuf>,
    search_path: Vec<PathBuf>,
    no_lang: bool,
    no_eval_const_subexpr: bool,
) -> slang::Result<ExitCode> {
    if no_lang {
        info!("--no-lang is accepted but has no effect yet");
    }
    let out_path = out.unwrap_or_else(|| module.with_extension("cmod"));
    let loader = build_loader(search_path);
    slang::compile_file(module, &out_path, loader.as_ref(), !no_eval_const_subexpr)?;
    info!(module = %module.display(), out = %out_path.display(), "compiled");
    println!("wrote {}", out_path.display());
    Ok(ExitCode::SUCCESS)
}

fn run_exec(
    module: &Path,
    disasm: bool,
    search_path: Vec<PathBuf>,
    no_lang: bool,
    args: Vec<String>,
) -> slang::Result<ExitCode> {
    if no_lang {
        info!("--no-lang is accepted but has no effect yet");
    }
    let bytes = std::fs::read(module).map_err(|e| slang::Error::fault(e.to_string()))?;
    let compiled = archive::decode_module(&bytes)?;

    if disasm {
        print!("{}", slang::module::disasm::disassemble(&compiled));
        return Ok(ExitCode::SUCCESS);
    }

    let loader = build_loader(search_path);
    let mut interp = Interpreter::load(compiled, loader.as_ref())?;
    let argv = interp.alloc_argv(args);
    let result = interp.run("main", vec![argv])?;
    info!(live_objects = interp.live_object_count(), "execution finished");

    match result {
        Some(Value::I32(code)) => {
            println!("{code}");
            Ok(exit_code_from_i32(code))
        }
        Some(value) => {
            println!("{value}");
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

fn build_loader(search_path: Vec<PathBuf>) -> Box<dyn ModuleLoader> {
    let mut dirs = search_path;
    dirs.push(PackageStore::default_root());
    Box::new(PathSearchLoader::new(dirs))
}

fn exit_code_from_i32(code: i32) -> ExitCode {
    ExitCode::from((code & 0xff) as u8)
}

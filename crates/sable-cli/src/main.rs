use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use sable_bytecode::{verify, Module};
use sable_compiler::CompileError;

#[derive(Parser)]
#[command(
    name = "sable",
    about = "Sable — compiles .sable sources to loadable bytecode modules"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a .sable source file to a bytecode module.
    Compile {
        /// Source file path (.sable)
        file: PathBuf,
        /// Output file path (.sbc). Defaults to same name with .sbc extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a source file and report diagnostics without emitting.
    Check {
        /// Source file path (.sable)
        file: PathBuf,
    },
    /// Dump the AST of a source file as JSON.
    Ast {
        /// Source file path (.sable)
        file: PathBuf,
    },
    /// Inspect a compiled bytecode module.
    Inspect {
        /// Bytecode file (.sbc)
        file: PathBuf,
    },
}

// Exit codes, one per failure class: 1 I/O or usage, 2 lex, 3 syntax,
// 4 name, 5 type, 70 internal.
fn exit_code(error: &CompileError) -> i32 {
    match error {
        CompileError::Lex(_) => 2,
        CompileError::Syntax(_) => 3,
        CompileError::Name(_) => 4,
        CompileError::Type(_) => 5,
        CompileError::Internal(_) => 70,
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(code) = run(cli) {
        process::exit(code);
    }
}

fn run(cli: Cli) -> Result<(), i32> {
    match cli.command {
        Command::Compile { file, output } => {
            let source = read_source(&file)?;
            let name = module_name(&file);
            let module = compile_or_report(&name, &source)?;
            let out_path = output.unwrap_or_else(|| file.with_extension("sbc"));
            let bytes = module.to_bytes().map_err(|e| {
                eprintln!("error: {e}");
                70
            })?;
            fs::write(&out_path, bytes).map_err(|e| {
                eprintln!("error: failed to write {}: {e}", out_path.display());
                1
            })?;
            println!("compiled {} -> {}", file.display(), out_path.display());
            println!(
                "  {} routine(s), {} constant(s)",
                module.routines.len(),
                module.constants.len()
            );
        }
        Command::Check { file } => {
            let source = read_source(&file)?;
            let name = module_name(&file);
            let module = compile_or_report(&name, &source)?;
            println!("ok: {} routine(s)", module.routines.len());
        }
        Command::Ast { file } => {
            let source = read_source(&file)?;
            let program = sable_compiler::parse_source(&source).map_err(|err| {
                report(&err);
                exit_code(&err)
            })?;
            let json = serde_json::to_string_pretty(&program).map_err(|e| {
                eprintln!("error: {e}");
                70
            })?;
            println!("{json}");
        }
        Command::Inspect { file } => {
            let bytes = fs::read(&file).map_err(|e| {
                eprintln!("error: failed to read {}: {e}", file.display());
                1
            })?;
            let module = Module::from_bytes(&bytes).map_err(|e| {
                eprintln!("error: {e}");
                1
            })?;
            print_module(&module);
            match verify(&module) {
                Ok(()) => println!("verification: ok"),
                Err(e) => {
                    eprintln!("verification failed: {e}");
                    return Err(1);
                }
            }
        }
    }
    Ok(())
}

fn read_source(file: &Path) -> Result<String, i32> {
    fs::read_to_string(file).map_err(|e| {
        eprintln!("error: failed to read {}: {e}", file.display());
        1
    })
}

fn module_name(file: &Path) -> String {
    file.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "module".into())
}

fn compile_or_report(name: &str, source: &str) -> Result<Module, i32> {
    sable_compiler::compile(name, source).map_err(|err| {
        report(&err);
        exit_code(&err)
    })
}

fn report(error: &CompileError) {
    let diagnostics = error.diagnostics();
    if diagnostics.is_empty() {
        eprintln!("error: {error}");
        return;
    }
    for diagnostic in diagnostics {
        eprintln!("{diagnostic}");
    }
}

fn print_module(module: &Module) {
    println!("module {} (version {})", module.name, module.version);
    println!("constants:");
    for (i, constant) in module.constants.iter().enumerate() {
        println!("  {i:4}: {} {constant}", constant.type_name());
    }
    println!("routines:");
    for routine in &module.routines {
        let params: Vec<String> = routine.params.iter().map(|p| p.to_string()).collect();
        println!(
            "  {}({}) -> {}  [max_stack {}, locals {}]",
            routine.name,
            params.join(", "),
            routine.ret,
            routine.max_stack,
            routine.local_slots
        );
        for (i, op) in routine.code.iter().enumerate() {
            println!("    {i:4}: {op:?}");
        }
    }
}

//! The `naab` driver: a thin front over the interpreter crate. Everything
//! interesting lives in `naab`; this binary parses the command line, wires
//! logging, and renders diagnostics.

use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use naab::{parse_with_diagnostics, Interp, InterpOptions};

#[derive(Parser, Debug)]
#[command(name = "naab", version, about = "The NAAb polyglot language")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Debug logging (implies --verbose).
    #[arg(long, global = true)]
    debug: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a script. Positional arguments after the script are exposed to
    /// the program through `env.get_args()`.
    Run {
        file: PathBuf,
        /// Script arguments; `--…` flags are filtered out.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Execute independent top-level polyglot blocks concurrently.
        #[arg(long)]
        parallel_blocks: bool,

        /// Allocations between automatic GC cycles.
        #[arg(long)]
        gc_threshold: Option<usize>,

        /// Sandbox level requested from the sandbox collaborator.
        #[arg(long, value_enum, default_value_t = SandboxLevel::Standard)]
        sandbox_level: SandboxLevel,

        /// Wall-clock timeout in seconds, enforced by the sandbox.
        #[arg(long)]
        timeout: Option<u64>,

        /// Memory limit in MB, enforced by the sandbox.
        #[arg(long)]
        memory_limit: Option<u64>,

        /// Allow network access inside foreign blocks.
        #[arg(long)]
        allow_network: bool,

        /// Emit a per-block timing profile to the profiler collaborator.
        #[arg(long)]
        profile: bool,

        /// Explain diagnostics with extended context.
        #[arg(long)]
        explain: bool,

        /// Read the program from stdin-friendly pipe mode.
        #[arg(long)]
        pipe: bool,
    },
    /// Parse a file and report diagnostics without executing it.
    Parse { file: PathBuf },
    /// Parse and apply declarations (struct validation included) without
    /// running `main`.
    Check { file: PathBuf },
    /// Print the interpreter version.
    Version,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SandboxLevel {
    Restricted,
    Standard,
    Elevated,
    Unrestricted,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };
    let mut logger = simple_logger::SimpleLogger::new().with_level(level);
    if cli.no_color {
        logger = logger.with_colors(false);
    }
    let _ = logger.init();

    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run {
            file,
            args,
            parallel_blocks,
            gc_threshold,
            sandbox_level,
            timeout,
            memory_limit,
            allow_network,
            profile,
            explain,
            pipe,
        } => {
            log::debug!(
                "sandbox level {sandbox_level:?}, timeout {timeout:?}s, memory {memory_limit:?}MB, network {allow_network}"
            );
            if profile || explain || pipe {
                log::debug!("profile={profile} explain={explain} pipe={pipe} handled by external collaborators");
            }
            let script_args: Vec<String> = args
                .into_iter()
                .filter(|arg| !arg.starts_with("--"))
                .collect();
            let mut options = InterpOptions {
                script_args,
                parallel_blocks,
                ..InterpOptions::default()
            };
            if let Some(threshold) = gc_threshold {
                options.gc_threshold = threshold;
            }
            let mut interp = Interp::with_default_executors(options);
            match interp.run_file(&file) {
                Ok(()) => Ok(ExitCode::SUCCESS),
                Err(err) => {
                    let source = fs::read_to_string(&file).ok();
                    eprintln!("{}", err.render(source.as_deref()));
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Parse { file } => {
            let source = fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let name = file.display().to_string();
            match parse_with_diagnostics(&source, &name) {
                Ok((program, diagnostics)) if diagnostics.is_empty() => {
                    println!(
                        "{}: {} function(s), {} struct(s), {} enum(s), main {}",
                        name,
                        program.functions.len(),
                        program.structs.len(),
                        program.enums.len(),
                        if program.main.is_some() {
                            "present"
                        } else {
                            "absent"
                        }
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Ok((_, diagnostics)) => {
                    for diagnostic in &diagnostics {
                        eprintln!("{name}:{}: {}", diagnostic.span, diagnostic.message);
                    }
                    Ok(ExitCode::FAILURE)
                }
                Err(err) => {
                    eprintln!("{}", err.render(Some(&source)));
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Check { file } => {
            let source = fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let name = file.display().to_string();
            let mut interp = Interp::new(InterpOptions::default());
            match interp.check_source(&source, &name) {
                Ok(()) => {
                    println!("{name}: OK");
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    eprintln!("{}", err.render(Some(&source)));
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Version => {
            println!("naab {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

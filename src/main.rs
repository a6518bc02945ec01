use anyhow::Context;
use clap::Parser;
use internment::Arena;

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use mmcheck::{llvm, opt, Config};

/// Removes redundant key checks on guarded pointers from an LLVM-lite program
#[derive(Parser)]
struct Args {
    path: PathBuf,
    /// TOML file with the pass configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// extra external procedures that never free memory
    #[arg(long = "whitelist", value_name = "NAME")]
    whitelist: Vec<String>,
    /// check guarded pointers before they are passed to calls
    #[arg(long)]
    insert_call_checks: bool,
    /// write the program here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// print what was changed to stderr
    #[arg(long)]
    stats: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().filter("MMCHECK_LOG"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.whitelist.extend(args.whitelist);
    config.insert_call_checks |= args.insert_call_checks;

    let s = fs::read_to_string(&args.path)
        .with_context(|| format!("could not read {}", args.path.display()))?;
    let arena = Arena::new();
    let mut prog = llvm::parse(&s, &arena)
        .with_context(|| format!("could not parse {}", args.path.display()))?;

    let report = opt::run(&mut prog, &arena, &config);

    match &args.output {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("could not create {}", path.display()))?;
            llvm::print::write(io::BufWriter::new(file), &prog)?;
        }
        None => llvm::print::write(io::stdout().lock(), &prog)?,
    }

    if args.stats {
        writeln!(io::stderr(), "{report}")?;
    }
    Ok(())
}

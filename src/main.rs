use anyhow::Context;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct CliArgs {
    directory: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    init_logging()?;
    sonicwave::app::run(args.directory)
}

// The terminal UI owns stdout, so logs go to a file in the config directory.
fn init_logging() -> anyhow::Result<()> {
    let path = sonicwave::config::log_path()?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sonicwave=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            flag if flag.starts_with('-') => anyhow::bail!("unknown argument {flag}"),
            dir => {
                if out.directory.is_some() {
                    anyhow::bail!("only one music directory can be given");
                }
                out.directory = Some(PathBuf::from(dir));
            }
        }
    }
    Ok(out)
}

fn print_help() {
    println!("SonicWave");
    println!("  sonicwave [DIR]   Scan DIR (or the last scanned directory) and start");
    println!("  -h, --help        Show this help");
    println!();
    println!("Logs are written to sonicwave.log in the config directory; set RUST_LOG to adjust.");
}

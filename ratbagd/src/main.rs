/* ratbagd: system daemon that probes gaming mice over hidraw, exposes
 * their configuration lattice on the system bus, and writes changes back
 * to hardware on request. See `reactor` for the event loop, `bus` for
 * the DBus surface, and `driver` for the protocol implementations. */
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ratbagd::reactor::Reactor;

const DEFAULT_DATA_DIR: &str = "/usr/share/libratbag";

/// ratbagd — configure gaming mice over the system message bus.
#[derive(Parser)]
#[command(name = "ratbagd", version, about)]
struct Args {
    /// Directory containing `.device` match files.
    #[arg(long, env = "RATBAGD_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Suppress all logging below warnings.
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity. Repeat for more detail, or pass
    /// `--verbose=raw`/`--verbose=debug` for the matching tracing level.
    #[arg(short, long)]
    verbose: Option<Option<String>>,
}

fn init_tracing(args: &Args) {
    let directive = if args.quiet {
        "warn"
    } else {
        match args.verbose.as_ref() {
            None => "info",
            Some(None) => "trace",
            Some(Some(level)) if level == "raw" => "trace",
            Some(Some(level)) if level == "debug" => "debug",
            Some(Some(_)) => "debug",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            err.print().ok();
            /* `--help`/`--version` also land here via clap's Display-and-exit
             * error kind; only genuine usage errors get the non-standard 22. */
            return if err.exit_code() == 0 { ExitCode::SUCCESS } else { ExitCode::from(22) };
        }
    };
    init_tracing(&args);

    let reactor = match Reactor::new(&args.data_dir).await {
        Ok(r) => r,
        Err(err) => {
            if err.to_string().contains("NameExists") || err.to_string().contains("already") {
                eprintln!("ratbagd: another instance is already running");
            } else {
                eprintln!("ratbagd: failed to start: {err:#}");
            }
            return ExitCode::FAILURE;
        }
    };

    match reactor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ratbagd: fatal error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

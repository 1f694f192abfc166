//! hottub launcher entry point.
//!
//! Unlike a normal CLI, this binary is invoked *as the VM would be*: its
//! own argv is the user's invocation, not a set of subcommands. Opt-in is a
//! single token (`-hottub` by default) found anywhere after argv[0] (spec
//! §6); its absence means skip all pool logic and exec the real VM
//! directly. We deliberately do not use `clap` here — there is no command
//! grammar to parse, only a linear scan for one marker, exactly as
//! `examples/original_source/hottub/client/java.c::main` does.

use hottub::config::HottubSettings;
use hottub::{context::InvocationContext, error::Error, fallback, fingerprint, pool};
use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();

    let argv: Vec<String> = std::env::args().collect();
    let settings = match HottubSettings::load() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            HottubSettings::default()
        }
    };

    if !argv[1..].iter().any(|a| a == &settings.opt_in_flag) {
        tracing::debug!("opt-in token absent, direct exec");
        exit_with(fallback::exec_direct(&argv));
    }

    let code = match run_pooled(&argv, &settings) {
        Ok(code) => code,
        Err(e) => {
            tracing::warn!(error = %e, "pooling failed, falling back to direct exec");
            exit_with(fallback::exec_direct(&argv));
        }
    };

    std::process::exit(code);
}

fn run_pooled(argv: &[String], settings: &HottubSettings) -> Result<i32, Error> {
    // The opt-in token is part of the raw argument vector spec.md §3 feeds
    // to fingerprint() — it is folded into the digest like any other
    // non-`-D` flag, exactly as `compute_id()` does in
    // `examples/original_source/hottub/client/java.c`. Stripping it here
    // would silently change every computed pool id.
    let fp = fingerprint::fingerprint(argv)?;
    let context = InvocationContext::capture(fp.argv_program.clone(), fp.argv_vm_opts.clone())?;

    match pool::run(fp.id, &context, settings)? {
        Some(code) => Ok(code),
        None => {
            tracing::warn!("no pool slot available, falling back to direct exec");
            exit_with(fallback::exec_direct(argv));
        }
    }
}

/// `fallback::exec_direct` only returns on failure (`execv` replaces the
/// process on success); any return here is itself the terminal error.
fn exit_with(result: Result<(), Error>) -> ! {
    if let Err(e) = result {
        eprintln!("hottub: {}", e);
        tracing::error!(error = %e, "fallback exec failed");
    }
    std::process::exit(127);
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hottub=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

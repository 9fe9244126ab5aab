//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use tilediff_cli::{CliError, run};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let code = match run() {
        Ok(verdict) => verdict.exit_code(),
        Err(CliError::ArgumentParsing(err)) if !err.use_stderr() => err.exit(),
        Err(err) => {
            eprintln!("tilediff: {err}");
            1
        }
    };
    std::process::exit(code);
}

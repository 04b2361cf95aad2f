mod cli;
mod commands;
mod env_loader;
mod error;
mod logging;
mod memory;

fn main() {
    if let Err(err) = cli::run() {
        logging::log_stderr(&format!("error: {err:#}"));
        std::process::exit(1);
    }
}

//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() {
    if let Err(err) = corridor_cli::run() {
        eprintln!("corridor: {err}");
        std::process::exit(err.exit_code());
    }
}

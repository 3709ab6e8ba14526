use std::process::ExitCode;

fn main() -> ExitCode {
    mpa_cli::run()
}

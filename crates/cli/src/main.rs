use std::process::ExitCode;

fn main() -> ExitCode {
    airloop_cli::run()
}

//! CGI entry point for the bundled Kagura application.

use std::io::{self, Write};
use std::process::ExitCode;

use kagura_cgi::cgi::CgiEnvironment;

fn main() -> ExitCode {
    let env = CgiEnvironment::from_process();
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    if let Err(error) = kagura_cgi::run(&env, stdin, stdout) {
        writeln!(io::stderr(), "kagura-cgi: failed to write response: {error}").ok();
    }
    ExitCode::SUCCESS
}

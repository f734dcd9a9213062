/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::process::ExitCode;

use burrow::{stdin_lines, Cli, Engine, EngineError};
use clap::{error::ErrorKind, Parser};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,

        // Edge case: `--help` is an "error" case according to Clap
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{e}");
            return ExitCode::SUCCESS;
        }

        Err(e) => {
            let err = EngineError::from(e);
            eprintln!("{err}");
            return ExitCode::from(err.exit_code());
        }
    };

    if cli.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let mut engine = match Engine::new(cli.config()) {
        Ok(engine) => engine,
        Err(e) => {
            let err = EngineError::from(e);
            eprintln!("{} encountered an error: {err}", env!("CARGO_PKG_NAME"));
            return ExitCode::from(err.exit_code());
        }
    };

    let result = stdin_lines().and_then(|input| engine.run(input));
    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let err = EngineError::from(e);
            eprintln!("{} encountered an error: {err}", env!("CARGO_PKG_NAME"));
            if err.is_fatal() {
                engine.fail(&err);
            }
            ExitCode::from(err.exit_code())
        }
    };

    for e in engine.shutdown() {
        eprintln!("{e:#}");
    }

    code
}

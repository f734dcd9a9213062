/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use clap::Parser;

use crate::{EngineConfig, LogLevel};

/// Flags accepted when the engine is launched.
///
/// Every flag may appear at most once; values may be given as `--flag=value` or `--flag value`.
#[derive(Debug, Clone, Parser)]
#[command(name = env!("CARGO_PKG_NAME"), about, disable_version_flag = true)]
pub struct Cli {
    /// Prints the version of the engine.
    #[arg(short = 'v', long)]
    pub version: bool,

    /// Enables debug mode.
    #[arg(long)]
    pub debug: bool,

    /// Sets the level at which logs are included in the log file.
    #[arg(long, value_enum, ignore_case = true, default_value_t = LogLevel::Trace)]
    pub log_level: LogLevel,
}

impl Cli {
    /// The engine configuration these flags describe.
    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            debug: self.debug,
            min_log_level: self.log_level,
            write_log_file: true,
            ..Default::default()
        }
    }
}

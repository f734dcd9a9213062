/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use clap::error::ErrorKind;
use thiserror::Error;

use crate::ParseError;

/// Everything that can end (or interrupt) the engine.
///
/// Errors never act on themselves: whoever receives one decides whether to log it,
/// flush, and exit with [`EngineError::exit_code`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("ValidationError: Something went wrong when validating input through CLI flags. ({0})")]
    Validation(String),

    #[error("ArgumentParseError: Something went wrong when parsing CLI flags. ({0})")]
    ArgumentParse(String),

    #[error("UciParseError: Something went wrong when parsing UCI input. ({0})")]
    ProtocolParse(#[from] ParseError),

    #[error("GracefulExit: The program was asked to exit gracefully.")]
    GracefulExit,

    #[error("GeneralError: An error occurred. ({0:#})")]
    General(anyhow::Error),
}

impl EngineError {
    /// Returns `true` if the process cannot continue after this error.
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::ProtocolParse(_) | Self::GracefulExit)
    }

    /// Process exit code to use when this error ends the program.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::GracefulExit => 0,
            _ => 1,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::General(err)
    }
}

impl From<clap::Error> for EngineError {
    fn from(err: clap::Error) -> Self {
        let message = err.to_string().trim().to_string();
        match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => Self::GracefulExit,
            ErrorKind::ArgumentConflict => Self::Validation(message),
            _ => Self::ArgumentParse(message),
        }
    }
}

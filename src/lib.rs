/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/// Flags accepted on the command line.
mod cli;

/// Parsing of protocol input into commands.
mod command;

/// The control context: dispatching commands and driving the event loop.
mod engine;

/// Errors that end the engine.
mod error;

/// In-memory log, written to disk on shutdown.
mod log;

/// Messages exchanged between the control and calculation contexts.
mod messaging;

/// Engine options and their canonical store.
mod options;

/// The seam between the engine and whatever performs a search.
mod search;

/// Lifecycle flags.
mod state;

/// Callbacks run on shutdown.
mod teardown;

/// The calculation context and its link to the control context.
mod worker;

pub use cli::*;
pub use command::*;
pub use engine::*;
pub use error::*;
pub use log::*;
pub use messaging::*;
pub use options::*;
pub use search::*;
pub use state::*;
pub use teardown::*;
pub use worker::*;

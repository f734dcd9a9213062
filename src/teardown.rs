/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::fmt;

use anyhow::Result;

type Callback = Box<dyn FnOnce() -> Result<()> + Send>;

/// Callbacks that must run before the process exits.
///
/// Callbacks run once, synchronously, in the order they were registered.
/// A failing callback does not prevent the ones after it from running.
#[derive(Default)]
pub struct Teardown {
    callbacks: Vec<(&'static str, Callback)>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` under `name`, which is only used when reporting failures.
    pub fn register<F>(&mut self, name: &'static str, callback: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.callbacks.push((name, Box::new(callback)));
    }

    /// Number of callbacks waiting to run.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Runs every registered callback, returning the errors of those that failed.
    ///
    /// The registry is left empty, so calling this twice runs nothing the second time.
    pub fn run(&mut self) -> Vec<anyhow::Error> {
        self.callbacks
            .drain(..)
            .filter_map(|(name, callback)| {
                callback()
                    .map_err(|err| err.context(format!("Teardown step {name:?} failed")))
                    .err()
            })
            .collect()
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.callbacks.iter().map(|(name, _)| name);
        f.debug_list().entries(names).finish()
    }
}

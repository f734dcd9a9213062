/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{AlgebraicMove, GoOptions};

/// Whatever actually searches positions.
///
/// The engine forwards `position`, `go`, `stop`, `ponderhit` and `ucinewgame` here
/// and polls [`Search::is_running`] to learn when a search has finished.
pub trait Search: Send {
    /// Sets the position to search from. `fen` is `None` for the starting position.
    fn set_position(&mut self, fen: Option<&str>, moves: &[AlgebraicMove]);

    /// Starts searching the current position. Must not block.
    fn start(&mut self, options: &GoOptions);

    /// Asks the current search to conclude as soon as possible.
    fn stop(&mut self);

    /// Returns `true` while a search started by [`Search::start`] is still going.
    fn is_running(&self) -> bool;

    /// The user has played the move the engine was pondering on.
    fn ponder_hit(&mut self) {}

    /// The next position will be from a different game.
    fn new_game(&mut self) {}
}

/// A [`Search`] that never computes anything.
///
/// Finite searches conclude immediately. Pondering and infinite searches
/// keep "running" until stopped, as the protocol demands.
#[derive(Debug, Default)]
pub struct IdleSearch {
    running: bool,
    fen: Option<String>,
    moves: Vec<AlgebraicMove>,
}

impl IdleSearch {
    /// The FEN last set through [`Search::set_position`].
    pub fn fen(&self) -> Option<&str> {
        self.fen.as_deref()
    }

    /// Moves last set through [`Search::set_position`].
    pub fn moves(&self) -> &[AlgebraicMove] {
        &self.moves
    }
}

impl Search for IdleSearch {
    fn set_position(&mut self, fen: Option<&str>, moves: &[AlgebraicMove]) {
        self.fen = fen.map(str::to_string);
        self.moves = moves.to_vec();
    }

    fn start(&mut self, options: &GoOptions) {
        self.running = options.infinite || options.ponder;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn ponder_hit(&mut self) {
        // Nothing to keep searching for once pondering turns into a real search
        self.running = false;
    }

    fn new_game(&mut self) {
        *self = Self::default();
    }
}

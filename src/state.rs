/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::fmt;

/// A single phase the engine can be in.
///
/// Flags are independent bits; several may be set at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleFlag {
    /// The engine is still initialising.
    Startup = 1 << 0,

    /// A fatal error has occurred.
    Error = 1 << 1,

    /// The engine is shutting down.
    Exiting = 1 << 2,

    /// The engine can respond to `isready` immediately.
    Ready = 1 << 3,

    /// A line of input is currently being processed.
    ReceivedUci = 1 << 4,

    /// A `go` is in progress.
    Thinking = 1 << 5,
}

impl LifecycleFlag {
    /// Every flag, in bit order.
    pub const ALL: [Self; 6] = [
        Self::Startup,
        Self::Error,
        Self::Exiting,
        Self::Ready,
        Self::ReceivedUci,
        Self::Thinking,
    ];

    /// The bit this flag occupies.
    #[inline(always)]
    pub const fn bit(self) -> u8 {
        self as u8
    }

    /// Uppercase name of this flag, used when logging.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Startup => "STARTUP",
            Self::Error => "ERROR",
            Self::Exiting => "EXITING",
            Self::Ready => "READY",
            Self::ReceivedUci => "RECEIVED_UCI",
            Self::Thinking => "THINKING",
        }
    }
}

// Every flag must fit in the backing integer.
const _: () = assert!(LifecycleFlag::ALL.len() <= u8::BITS as usize);

/// The set of [`LifecycleFlag`]s the engine is currently in.
///
/// This is plain state: no transition is ever refused. Callers are expected to
/// clear [`LifecycleFlag::Startup`] before setting [`LifecycleFlag::Ready`],
/// to hold [`LifecycleFlag::ReceivedUci`] only while a single line is processed,
/// and to hold [`LifecycleFlag::Thinking`] only while a search runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct LifecycleState(u8);

impl LifecycleState {
    /// The empty state.
    pub const NONE: Self = Self(0);

    /// Removes every flag.
    #[inline(always)]
    pub fn clear(&mut self) {
        self.0 = Self::NONE.0;
    }

    /// Returns `true` if `flag` is set.
    #[inline(always)]
    pub const fn is_set(&self, flag: LifecycleFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Sets `flag`, returning the new state.
    #[inline(always)]
    pub fn add(&mut self, flag: LifecycleFlag) -> Self {
        self.0 |= flag.bit();
        *self
    }

    /// Unsets `flag`, returning the new state.
    #[inline(always)]
    pub fn remove(&mut self, flag: LifecycleFlag) -> Self {
        self.0 &= !flag.bit();
        *self
    }

    /// Raw bits of this state.
    #[inline(always)]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Returns `true` if no flag is set.
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// An iterator over all flags currently set, in bit order.
    pub fn flags(&self) -> impl Iterator<Item = LifecycleFlag> + '_ {
        LifecycleFlag::ALL
            .into_iter()
            .filter(|flag| self.is_set(*flag))
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }

        let names = self.flags().map(LifecycleFlag::name).collect::<Vec<_>>();
        write!(f, "{}", names.join(" | "))
    }
}

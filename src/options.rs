/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Errors raised when reading or writing an option.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    #[error("Unrecognized option {0:?}")]
    UnknownOption(String),

    #[error("Option {key} expects a {expected} value. got {value}")]
    TypeMismatch {
        key: OptionKey,
        expected: &'static str,
        value: OptionValue,
    },

    #[error("Option {key} expects {expected}. got {value:?}")]
    InvalidValue {
        key: OptionKey,
        expected: &'static str,
        value: String,
    },

    #[error("Value {value} for option {key} is outside of [{min}, {max}]")]
    OutOfRange {
        key: OptionKey,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Malformed option snapshot entry {0:?}")]
    MalformedSnapshot(String),
}

/// The shape of the values an option accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// `true` or `false`.
    Check { default: bool },

    /// An integer within `min..=max`.
    Spin { default: i64, min: i64, max: i64 },
}

/// Every option the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionKey {
    Debug,
    Hash,
    Threads,
    Ponder,
    Chess960,
}

impl OptionKey {
    /// Number of options.
    pub const COUNT: usize = 5;

    /// Every option, in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Debug,
        Self::Hash,
        Self::Threads,
        Self::Ponder,
        Self::Chess960,
    ];

    /// The name this option goes by in the protocol.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Hash => "Hash",
            Self::Threads => "Threads",
            Self::Ponder => "Ponder",
            Self::Chess960 => "UCI_Chess960",
        }
    }

    /// What values this option accepts, and its default.
    pub const fn kind(self) -> OptionKind {
        match self {
            Self::Debug => OptionKind::Check { default: false },
            Self::Hash => OptionKind::Spin {
                default: 16,
                min: 1,
                max: 1024,
            },
            Self::Threads => OptionKind::Spin {
                default: 1,
                min: 1,
                max: 1,
            },
            Self::Ponder => OptionKind::Check { default: false },
            Self::Chess960 => OptionKind::Check { default: false },
        }
    }

    /// The value this option starts with.
    pub const fn default_value(self) -> OptionValue {
        match self.kind() {
            OptionKind::Check { default } => OptionValue::Bool(default),
            OptionKind::Spin { default, .. } => OptionValue::Int(default),
        }
    }

    /// Looks up an option by its protocol name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Parses a raw protocol value for this option, checking type and range.
    pub fn parse_value(self, raw: &str) -> Result<OptionValue, OptionError> {
        let raw = raw.trim();
        match self.kind() {
            OptionKind::Check { .. } => match raw.to_ascii_lowercase().as_str() {
                "true" | "on" => Ok(OptionValue::Bool(true)),
                "false" | "off" => Ok(OptionValue::Bool(false)),
                _ => Err(OptionError::InvalidValue {
                    key: self,
                    expected: "true or false",
                    value: raw.to_string(),
                }),
            },
            OptionKind::Spin { .. } => {
                let Ok(value) = raw.parse::<i64>() else {
                    return Err(OptionError::InvalidValue {
                        key: self,
                        expected: "an integer",
                        value: raw.to_string(),
                    });
                };
                self.check(OptionValue::Int(value))
            }
        }
    }

    /// Ensures `value` has the right type and lies within range for this option.
    pub fn check(self, value: OptionValue) -> Result<OptionValue, OptionError> {
        match (self.kind(), value) {
            (OptionKind::Check { .. }, OptionValue::Bool(_)) => Ok(value),
            (OptionKind::Spin { min, max, .. }, OptionValue::Int(n)) => {
                if (min..=max).contains(&n) {
                    Ok(value)
                } else {
                    Err(OptionError::OutOfRange {
                        key: self,
                        value: n,
                        min,
                        max,
                    })
                }
            }
            (OptionKind::Check { .. }, _) => Err(OptionError::TypeMismatch {
                key: self,
                expected: "boolean",
                value,
            }),
            (OptionKind::Spin { .. }, _) => Err(OptionError::TypeMismatch {
                key: self,
                expected: "integer",
                value,
            }),
        }
    }

    /// The `option name ... type ...` line advertised in response to `uci`.
    pub fn declaration(self) -> String {
        match self.kind() {
            OptionKind::Check { default } => {
                format!("option name {} type check default {default}", self.name())
            }
            OptionKind::Spin { default, min, max } => format!(
                "option name {} type spin default {default} min {min} max {max}",
                self.name()
            ),
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptionKey {
    type Err = OptionError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| OptionError::UnknownOption(s.to_string()))
    }
}

/// The value of an option. Any given key only ever holds one of these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
}

impl OptionValue {
    pub const fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(b),
            Self::Int(_) => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => b.fmt(f),
            Self::Int(n) => n.fmt(f),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Canonical values of every [`OptionKey`].
///
/// Only the control context owns one of these for real; the calculation context
/// receives a copy at startup and goes through the messaging channel afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionStore {
    values: [OptionValue; OptionKey::COUNT],
}

impl OptionStore {
    /// Creates a store holding every option's default.
    pub fn new() -> Self {
        Self {
            values: OptionKey::ALL.map(OptionKey::default_value),
        }
    }

    /// Current value of `key`.
    #[inline(always)]
    pub fn get(&self, key: OptionKey) -> OptionValue {
        self.values[key as usize]
    }

    /// Replaces the value of `key`, refusing values of the wrong type or out of range.
    pub fn set(&mut self, key: OptionKey, value: OptionValue) -> Result<(), OptionError> {
        self.values[key as usize] = key.check(value)?;
        Ok(())
    }

    /// Parses `raw` for `key` and stores it, returning the stored value.
    pub fn set_from_str(&mut self, key: OptionKey, raw: &str) -> Result<OptionValue, OptionError> {
        let value = key.parse_value(raw)?;
        self.values[key as usize] = value;
        Ok(value)
    }

    /// Whether debug mode is on.
    pub fn debug(&self) -> bool {
        self.get(OptionKey::Debug).as_bool().unwrap_or_default()
    }

    /// An iterator over every option and its current value.
    pub fn iter(&self) -> impl Iterator<Item = (OptionKey, OptionValue)> + '_ {
        OptionKey::ALL.into_iter().map(|key| (key, self.get(key)))
    }

    /// Serializes every option as `Name=value` pairs separated by `;`.
    pub fn to_snapshot(&self) -> String {
        self.iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Rebuilds a store from [`OptionStore::to_snapshot`] output.
    ///
    /// Options absent from the snapshot keep their defaults.
    pub fn from_snapshot(snapshot: &str) -> Result<Self, OptionError> {
        let mut store = Self::new();

        for entry in snapshot.split(';').filter(|e| !e.trim().is_empty()) {
            let Some((name, raw)) = entry.split_once('=') else {
                return Err(OptionError::MalformedSnapshot(entry.to_string()));
            };

            let key = name.parse::<OptionKey>()?;
            store.set_from_str(key, raw)?;
        }

        Ok(store)
    }
}

impl Default for OptionStore {
    fn default() -> Self {
        Self::new()
    }
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{fmt, time::Duration};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use crate::{LogRecord, OptionError, OptionKey, OptionValue};

/// Ways the messaging channel can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("the other end of the channel has disconnected")]
    Disconnected,

    #[error("the calculation context was asked to terminate")]
    Terminated,

    #[error("the control context refused the request: {0}")]
    Rejected(OptionError),

    #[error("expected a reply of kind {expected} to request {id}, got {got:?}")]
    UnexpectedReply {
        id: RequestId,
        expected: &'static str,
        got: Message,
    },
}

/// Correlates a request with its reply.
///
/// Identifiers are handed out in increasing order by whoever sends requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Returns this identifier, advancing `self` to the next one.
    #[inline(always)]
    pub fn next(&mut self) -> Self {
        let id = *self;
        self.0 += 1;
        id
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything that can travel between the control and calculation contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// The request `id` has been handled.
    Acknowledgement { id: RequestId },

    /// Append `record` to the engine's log.
    DebugLog { id: RequestId, record: LogRecord },

    /// Change the canonical value of `key`.
    OptionSet {
        id: RequestId,
        key: OptionKey,
        value: OptionValue,
    },

    /// Ask for the canonical value of `key`.
    OptionRead { id: RequestId, key: OptionKey },

    /// Reply to [`Message::OptionRead`].
    OptionReadResponse {
        id: RequestId,
        key: OptionKey,
        value: OptionValue,
    },

    /// Reply to a [`Message::OptionSet`] whose value was not applied.
    OptionRejected { id: RequestId, error: OptionError },
}

impl Message {
    /// The request this message belongs to.
    pub const fn id(&self) -> RequestId {
        match self {
            Self::Acknowledgement { id }
            | Self::DebugLog { id, .. }
            | Self::OptionSet { id, .. }
            | Self::OptionRead { id, .. }
            | Self::OptionReadResponse { id, .. }
            | Self::OptionRejected { id, .. } => *id,
        }
    }

    /// Short name of this kind of message, for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Acknowledgement { .. } => "ACKNOWLEDGEMENT",
            Self::DebugLog { .. } => "DEBUG_LOG",
            Self::OptionSet { .. } => "OPTION_SET",
            Self::OptionRead { .. } => "OPTION_READ",
            Self::OptionReadResponse { .. } => "OPTION_READ_RESPONSE",
            Self::OptionRejected { .. } => "OPTION_REJECTED",
        }
    }
}

/// One end of a bidirectional, ordered channel.
///
/// Each direction is FIFO; the two directions are independent of one another.
#[derive(Debug)]
pub struct Endpoint {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
}

/// Creates a connected pair of [`Endpoint`]s.
pub fn duplex() -> (Endpoint, Endpoint) {
    let (a_tx, b_rx) = unbounded();
    let (b_tx, a_rx) = unbounded();

    (
        Endpoint {
            sender: a_tx,
            receiver: a_rx,
        },
        Endpoint {
            sender: b_tx,
            receiver: b_rx,
        },
    )
}

impl Endpoint {
    /// Sends `message` to the other end.
    pub fn send(&self, message: Message) -> Result<(), ChannelError> {
        self.sender
            .send(message)
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Blocks until a message arrives or `timeout` elapses, returning `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, ChannelError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Disconnected),
        }
    }

    /// The receiving half, for use in `select!`.
    pub fn receiver(&self) -> &Receiver<Message> {
        &self.receiver
    }
}

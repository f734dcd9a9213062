/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Receiver;

use crate::{
    duplex, ChannelError, Endpoint, LogBuffer, LogLevel, LogRecord, Message, OptionKey,
    OptionStore, OptionValue, RequestId,
};

/// How often a waiting calculation context checks whether it should terminate.
const TERMINATION_POLL: Duration = Duration::from_millis(10);

/// Control-side half of the link to the calculation context.
///
/// The control context is authoritative: it answers every request the calculation
/// context makes, and is the only one to ever write to the canonical [`OptionStore`].
#[derive(Debug)]
pub struct Coordinator {
    endpoint: Endpoint,
}

impl Coordinator {
    /// Messages from the calculation context, for use in `select!`.
    pub fn receiver(&self) -> &Receiver<Message> {
        self.endpoint.receiver()
    }

    /// Handles a single message received from the calculation context.
    ///
    /// Replies that show up on this side belong to no request the control context made,
    /// so they are logged and dropped.
    pub fn handle(
        &self,
        message: Message,
        options: &mut OptionStore,
        logs: &LogBuffer,
    ) -> Result<(), ChannelError> {
        logs.trace(format!("Received {} {}", message.kind(), message.id()));

        match message {
            Message::OptionSet { id, key, value } => match options.set(key, value) {
                Ok(()) => {
                    logs.info(format!("Calculation context set {key} to {value}"));
                    self.endpoint.send(Message::Acknowledgement { id })
                }
                Err(error) => {
                    logs.warning(format!("Rejecting OPTION_SET {id}: {error}"));
                    self.endpoint.send(Message::OptionRejected { id, error })
                }
            },

            Message::OptionRead { id, key } => self.endpoint.send(Message::OptionReadResponse {
                id,
                key,
                value: options.get(key),
            }),

            Message::DebugLog { id, record } => {
                logs.push(record);
                self.endpoint.send(Message::Acknowledgement { id })
            }

            reply @ (Message::Acknowledgement { .. }
            | Message::OptionReadResponse { .. }
            | Message::OptionRejected { .. }) => {
                logs.warning(format!(
                    "Control context received unexpected {} {}",
                    reply.kind(),
                    reply.id()
                ));
                Ok(())
            }
        }
    }
}

/// A request that has been sent but whose reply hasn't been collected yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "a pending request should be waited on"]
pub struct Pending(RequestId);

/// Calculation-side half of the link to the control context.
///
/// Every read or write of an option goes through a request answered by the control
/// context. Several requests may be outstanding at once; replies are matched to
/// requests by [`RequestId`], so they may be collected in any order.
pub struct WorkerLink {
    endpoint: Endpoint,
    next_id: RequestId,
    parked: HashMap<RequestId, Message>,
    terminate: Arc<AtomicBool>,
    startup: OptionStore,
}

impl WorkerLink {
    /// Options as they were when this calculation context was spawned.
    pub fn startup_options(&self) -> &OptionStore {
        &self.startup
    }

    /// Returns `true` once the control context has asked this context to stop.
    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::Relaxed)
    }

    /// Sends a request built from a fresh [`RequestId`], without waiting for its reply.
    pub fn submit(
        &mut self,
        request: impl FnOnce(RequestId) -> Message,
    ) -> Result<Pending, ChannelError> {
        let id = self.next_id.next();
        self.endpoint.send(request(id))?;
        Ok(Pending(id))
    }

    /// Blocks until the reply to `pending` arrives.
    ///
    /// Replies to other requests that arrive meanwhile are kept for later.
    pub fn wait(&mut self, pending: Pending) -> Result<Message, ChannelError> {
        if let Some(reply) = self.parked.remove(&pending.0) {
            return Ok(reply);
        }

        loop {
            if self.is_terminated() {
                return Err(ChannelError::Terminated);
            }

            let Some(message) = self.endpoint.recv_timeout(TERMINATION_POLL)? else {
                continue;
            };

            if message.id() == pending.0 {
                return Ok(message);
            }
            self.parked.insert(message.id(), message);
        }
    }

    /// Fetches the canonical value of `key` from the control context.
    pub fn read_option(&mut self, key: OptionKey) -> Result<OptionValue, ChannelError> {
        let pending = self.submit(|id| Message::OptionRead { id, key })?;
        match self.wait(pending)? {
            Message::OptionReadResponse { value, .. } => Ok(value),
            got => Err(ChannelError::UnexpectedReply {
                id: pending.0,
                expected: "OPTION_READ_RESPONSE",
                got,
            }),
        }
    }

    /// Changes the canonical value of `key`, returning once the control context has applied it.
    ///
    /// Values of the wrong type or out of range are refused with [`ChannelError::Rejected`].
    pub fn set_option(
        &mut self,
        key: OptionKey,
        value: impl Into<OptionValue>,
    ) -> Result<(), ChannelError> {
        let value = value.into();
        let pending = self.submit(|id| Message::OptionSet { id, key, value })?;
        match self.wait(pending)? {
            Message::Acknowledgement { .. } => Ok(()),
            Message::OptionRejected { error, .. } => Err(ChannelError::Rejected(error)),
            got => Err(ChannelError::UnexpectedReply {
                id: pending.0,
                expected: "ACKNOWLEDGEMENT",
                got,
            }),
        }
    }

    /// Appends a record to the engine's log, returning once the control context has stored it.
    pub fn log(&mut self, level: LogLevel, message: impl fmt::Display) -> Result<(), ChannelError> {
        let record = LogRecord::new(level, message);
        let pending = self.submit(|id| Message::DebugLog { id, record })?;
        self.expect_ack(pending)
    }

    /// Waits on `pending`, which must be answered with an acknowledgement.
    pub fn expect_ack(&mut self, pending: Pending) -> Result<(), ChannelError> {
        match self.wait(pending)? {
            Message::Acknowledgement { .. } => Ok(()),
            got => Err(ChannelError::UnexpectedReply {
                id: pending.0,
                expected: "ACKNOWLEDGEMENT",
                got,
            }),
        }
    }

    /// Blocks until termination is requested or the control context goes away.
    pub fn wait_for_shutdown(&mut self) {
        while !self.is_terminated() {
            // Nobody is waiting on replies at this point, so they can be dropped
            if self.endpoint.recv_timeout(TERMINATION_POLL).is_err() {
                break;
            }
        }
    }
}

impl fmt::Debug for WorkerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLink")
            .field("next_id", &self.next_id)
            .field("parked", &self.parked.len())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Handle to the calculation context's thread.
#[derive(Debug)]
pub struct Worker {
    handle: JoinHandle<()>,
    terminate: Arc<AtomicBool>,
}

impl Worker {
    /// Spawns the calculation context, running `body` on its own thread.
    ///
    /// `snapshot` is the serialized [`OptionStore`] the context starts from.
    /// Returns the control-side [`Coordinator`] and a handle to the thread.
    pub fn spawn<F>(snapshot: String, body: F) -> Result<(Coordinator, Self)>
    where
        F: FnOnce(WorkerLink) + Send + 'static,
    {
        let (control, calculation) = duplex();
        let terminate = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&terminate);

        let handle = thread::Builder::new()
            .name(String::from("calculation"))
            .spawn(move || {
                let mut link = WorkerLink {
                    endpoint: calculation,
                    next_id: RequestId::default(),
                    parked: HashMap::new(),
                    terminate: flag,
                    startup: OptionStore::default(),
                };

                match OptionStore::from_snapshot(&snapshot) {
                    Ok(options) => link.startup = options,
                    Err(err) => {
                        // Defaults are still usable, so carry on after reporting it
                        _ = link.log(
                            LogLevel::Error,
                            format!("Failed to read startup options {snapshot:?}: {err}"),
                        );
                    }
                }

                body(link)
            })
            .context("Failed to spawn the calculation thread")?;

        Ok((Coordinator { endpoint: control }, Self { handle, terminate }))
    }

    /// Asks the calculation context to stop, without waiting for it to do so.
    pub fn request_termination(&self) {
        self.terminate.store(true, Ordering::Relaxed);
    }

    /// Asks the calculation context to stop, then blocks until its thread exits.
    pub fn terminate(self) -> Result<()> {
        self.request_termination();

        let id = self.handle.thread().id();
        self.handle
            .join()
            .map_err(|_| anyhow!("Calculation thread {id:?} panicked"))
    }
}

/// What the calculation context does when no search is wired in: announce itself, then idle.
pub fn idle(mut link: WorkerLink) {
    let announced = link.log(
        LogLevel::Info,
        format!(
            "Calculation context started with options {}",
            link.startup_options().to_snapshot()
        ),
    );

    if announced.is_ok() {
        link.wait_for_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OptionError;
    use crossbeam_channel::bounded;

    /// Serves a single calculation context on the current thread until it disconnects.
    fn serve(coordinator: &Coordinator, options: &mut OptionStore, logs: &LogBuffer) {
        while let Ok(message) = coordinator.receiver().recv() {
            if coordinator.handle(message, options, logs).is_err() {
                break;
            }
        }
    }

    #[test]
    fn test_set_then_read() {
        let (result_tx, result_rx) = bounded(1);
        let mut options = OptionStore::new();
        let logs = LogBuffer::new(LogLevel::Trace);

        let (coordinator, worker) = Worker::spawn(options.to_snapshot(), move |mut link| {
            link.set_option(OptionKey::Debug, true).unwrap();
            let value = link.read_option(OptionKey::Debug).unwrap();
            result_tx.send(value).unwrap();
        })
        .unwrap();

        serve(&coordinator, &mut options, &logs);
        worker.terminate().unwrap();

        assert_eq!(result_rx.recv().unwrap(), OptionValue::Bool(true));
        assert!(options.debug(), "canonical store was not updated");
    }

    #[test]
    fn test_startup_snapshot() {
        let (result_tx, result_rx) = bounded(1);
        let mut options = OptionStore::new();
        options.set(OptionKey::Hash, OptionValue::Int(256)).unwrap();

        let (coordinator, worker) = Worker::spawn(options.to_snapshot(), move |link| {
            result_tx.send(*link.startup_options()).unwrap();
        })
        .unwrap();

        let logs = LogBuffer::new(LogLevel::Trace);
        serve(&coordinator, &mut options, &logs);
        worker.terminate().unwrap();

        assert_eq!(result_rx.recv().unwrap(), options);
    }

    #[test]
    fn test_corrupt_snapshot_falls_back_to_defaults() {
        let (result_tx, result_rx) = bounded(1);
        let mut options = OptionStore::new();
        let logs = LogBuffer::new(LogLevel::Trace);

        let (coordinator, worker) = Worker::spawn(String::from("Hash=lots"), move |link| {
            result_tx.send(*link.startup_options()).unwrap();
        })
        .unwrap();

        serve(&coordinator, &mut options, &logs);
        worker.terminate().unwrap();

        assert_eq!(result_rx.recv().unwrap(), OptionStore::default());
        let records = logs.records();
        assert!(records
            .iter()
            .any(|r| r.level == LogLevel::Error && r.message.contains("Hash=lots")));
    }

    #[test]
    fn test_logs_arrive_in_order() {
        let mut options = OptionStore::new();
        let logs = LogBuffer::new(LogLevel::Trace);

        let (coordinator, worker) = Worker::spawn(options.to_snapshot(), |mut link| {
            for i in 0..3 {
                link.log(LogLevel::Debug, format!("line {i}")).unwrap();
            }
        })
        .unwrap();

        serve(&coordinator, &mut options, &logs);
        worker.terminate().unwrap();

        let lines = logs
            .records()
            .into_iter()
            .filter(|r| r.level == LogLevel::Debug)
            .map(|r| r.message)
            .collect::<Vec<_>>();
        assert_eq!(lines, ["line 0", "line 1", "line 2"]);
    }

    #[test]
    fn test_concurrent_requests_are_correlated() {
        let (result_tx, result_rx) = bounded(1);
        let mut options = OptionStore::new();
        let logs = LogBuffer::new(LogLevel::Trace);

        let (coordinator, worker) = Worker::spawn(options.to_snapshot(), move |mut link| {
            let hash = link
                .submit(|id| Message::OptionRead {
                    id,
                    key: OptionKey::Hash,
                })
                .unwrap();
            let debug = link
                .submit(|id| Message::OptionRead {
                    id,
                    key: OptionKey::Debug,
                })
                .unwrap();
            let set = link
                .submit(|id| Message::OptionSet {
                    id,
                    key: OptionKey::Ponder,
                    value: OptionValue::Bool(true),
                })
                .unwrap();

            // Collect in the opposite order they were sent
            link.expect_ack(set).unwrap();
            let debug = link.wait(debug).unwrap();
            let hash = link.wait(hash).unwrap();
            result_tx.send((hash, debug)).unwrap();
        })
        .unwrap();

        serve(&coordinator, &mut options, &logs);
        worker.terminate().unwrap();

        let (hash, debug) = result_rx.recv().unwrap();
        assert!(matches!(
            hash,
            Message::OptionReadResponse {
                key: OptionKey::Hash,
                value: OptionValue::Int(16),
                ..
            }
        ));
        assert!(matches!(
            debug,
            Message::OptionReadResponse {
                key: OptionKey::Debug,
                value: OptionValue::Bool(false),
                ..
            }
        ));
        assert_eq!(options.get(OptionKey::Ponder), OptionValue::Bool(true));
    }

    #[test]
    fn test_rejected_set_is_reported() {
        let (result_tx, result_rx) = bounded(1);
        let mut options = OptionStore::new();
        let logs = LogBuffer::new(LogLevel::Trace);

        let (coordinator, worker) = Worker::spawn(options.to_snapshot(), move |mut link| {
            let wrong_type = link.set_option(OptionKey::Hash, true);
            let out_of_range = link.set_option(OptionKey::Hash, 4096_i64);
            let applied = link.set_option(OptionKey::Hash, 32_i64);
            result_tx.send((wrong_type, out_of_range, applied)).unwrap();
        })
        .unwrap();

        serve(&coordinator, &mut options, &logs);
        worker.terminate().unwrap();

        let (wrong_type, out_of_range, applied) = result_rx.recv().unwrap();
        assert!(matches!(
            wrong_type,
            Err(ChannelError::Rejected(OptionError::TypeMismatch { .. }))
        ));
        assert!(matches!(
            out_of_range,
            Err(ChannelError::Rejected(OptionError::OutOfRange { value: 4096, .. }))
        ));
        assert_eq!(applied, Ok(()));
        assert_eq!(options.get(OptionKey::Hash), OptionValue::Int(32));
        assert!(logs
            .records()
            .iter()
            .any(|r| r.level == LogLevel::Warning && r.message.contains("OPTION_SET")));
    }

    #[test]
    fn test_unexpected_reply_on_control_side() {
        let (control, _calculation) = duplex();
        let coordinator = Coordinator { endpoint: control };
        let mut options = OptionStore::new();
        let logs = LogBuffer::new(LogLevel::Trace);

        let result = coordinator.handle(
            Message::Acknowledgement { id: RequestId(4) },
            &mut options,
            &logs,
        );
        assert_eq!(result, Ok(()));
        assert!(logs
            .records()
            .iter()
            .any(|r| r.level == LogLevel::Warning && r.message.contains("ACKNOWLEDGEMENT")));
    }

    #[test]
    fn test_terminate_stops_idle_worker() {
        let (_coordinator, worker) = Worker::spawn(OptionStore::new().to_snapshot(), |mut link| {
            link.wait_for_shutdown()
        })
        .unwrap();

        worker.request_termination();
        worker.terminate().unwrap();
    }

    #[test]
    fn test_waiting_request_observes_termination() {
        let (result_tx, result_rx) = bounded(1);

        // Nobody serves the coordinator, so the read can only end through termination
        let (_coordinator, worker) = Worker::spawn(OptionStore::new().to_snapshot(), move |mut link| {
            result_tx.send(link.read_option(OptionKey::Hash)).unwrap();
        })
        .unwrap();

        worker.terminate().unwrap();
        assert_eq!(result_rx.recv().unwrap(), Err(ChannelError::Terminated));
    }

    #[test]
    fn test_worker_sees_disconnect() {
        let (result_tx, result_rx) = bounded(1);
        let (coordinator, worker) = Worker::spawn(OptionStore::new().to_snapshot(), move |mut link| {
            result_tx.send(link.read_option(OptionKey::Hash)).unwrap();
        })
        .unwrap();

        drop(coordinator);
        assert_eq!(result_rx.recv().unwrap(), Err(ChannelError::Disconnected));
        worker.terminate().unwrap();
    }
}

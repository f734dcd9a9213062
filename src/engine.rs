/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
    fmt,
    io::{self, BufRead, BufReader, Stdout, Write},
    ops::ControlFlow,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{never, select, tick, unbounded, Receiver, RecvError, Sender};

use crate::{
    worker, ChannelError, Command, Coordinator, EngineError, GoOptions, IdleSearch,
    LifecycleFlag, LifecycleState, LogBuffer, LogLevel, Message, OptionKey, OptionStore, Search,
    Teardown, Worker, WorkerLink,
};

/// Interval between two checks of a pending `isready`, or of a running search.
pub const TICK: Duration = Duration::from_millis(10);

/// Startup configuration of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Initial value of the `Debug` option.
    pub debug: bool,

    /// Log records below this level are discarded.
    pub min_log_level: LogLevel,

    /// Whether to write the log to the temp directory on shutdown.
    pub write_log_file: bool,

    /// Interval of the repeating checks performed while waiting on something.
    pub tick: Duration,

    /// How long an `isready` may wait for the engine to become ready.
    ///
    /// `None` waits forever.
    pub ready_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug: false,
            min_log_level: LogLevel::Trace,
            write_log_file: false,
            tick: TICK,
            ready_timeout: None,
        }
    }
}

/// The engine's control context.
///
/// Owns the lifecycle state, the canonical options, the log, and the link to the
/// calculation context. Input lines are handled one at a time on a single thread.
pub struct Engine<W: Write = Stdout> {
    /// Phase(s) the engine is currently in.
    state: LifecycleState,

    /// Canonical values of every option.
    options: OptionStore,

    /// Everything the engine has done, written to disk on shutdown.
    logs: LogBuffer,

    /// Where protocol responses are written.
    out: W,

    /// Whatever performs the actual search.
    search: Box<dyn Search>,

    /// Control end of the messaging channel. `None` once the calculation context is gone.
    coordinator: Option<Coordinator>,

    /// The calculation context's thread, until it is joined on shutdown.
    worker: Option<Worker>,

    /// When each `isready` still awaiting a `readyok` was received.
    readiness_checks: Vec<Instant>,

    /// Fires every `config.tick` for as long as the engine holds it.
    ticker: Receiver<Instant>,

    /// Callbacks to run before exiting.
    teardown: Teardown,

    config: EngineConfig,
}

impl Engine {
    /// Constructs an [`Engine`] writing to `stdout`, with an idle search and calculation context.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_io(config, io::stdout(), IdleSearch::default(), worker::idle)
    }
}

impl<W: Write> Engine<W> {
    /// Constructs an [`Engine`] writing responses to `out`, forwarding searches to `search`,
    /// and running `calculation` as the body of the calculation context.
    pub fn with_io<S, F>(config: EngineConfig, out: W, search: S, calculation: F) -> Result<Self>
    where
        S: Search + 'static,
        F: FnOnce(WorkerLink) + Send + 'static,
    {
        let mut state = LifecycleState::NONE;
        state.add(LifecycleFlag::Startup);

        let logs = LogBuffer::new(config.min_log_level);
        logs.info(format!(
            "Starting {} {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ));

        let mut options = OptionStore::new();
        options.set(OptionKey::Debug, config.debug.into())?;

        let (coordinator, worker) = Worker::spawn(options.to_snapshot(), calculation)?;
        logs.info("Spawned the calculation context");

        let mut teardown = Teardown::new();
        if config.write_log_file {
            let logs = logs.clone();
            teardown.register("write log file", move || {
                let path = logs.flush_to_temp_dir()?;
                eprintln!("Log file: {}", path.display());
                Ok(())
            });
        }

        Ok(Self {
            state,
            options,
            logs,
            out,
            search: Box::new(search),
            coordinator: Some(coordinator),
            worker: Some(worker),
            readiness_checks: Vec::new(),
            ticker: tick(config.tick),
            teardown,
            config,
        })
    }

    /// Returns a string of the engine's name and current version.
    pub fn name(&self) -> String {
        format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }

    /// Returns a string of all authors of this engine.
    pub fn authors(&self) -> String {
        // Split multiple authors by comma-space
        env!("CARGO_PKG_AUTHORS").replace(':', ", ")
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn options(&self) -> &OptionStore {
        &self.options
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    /// Everything written to the protocol output so far.
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Number of `isready` commands still waiting for their `readyok`.
    pub fn pending_readiness_checks(&self) -> usize {
        self.readiness_checks.len()
    }

    /// Leaves startup: clears [`LifecycleFlag::Startup`], then sets [`LifecycleFlag::Ready`].
    pub fn mark_ready(&mut self) {
        self.state.remove(LifecycleFlag::Startup);
        debug_assert!(!self.state.is_set(LifecycleFlag::Startup));
        self.state.add(LifecycleFlag::Ready);
        self.logs.info(format!("Engine is ready ({})", self.state));
    }

    /// Entrypoint of the engine.
    ///
    /// Marks the engine as ready, then handles input lines, messages from the calculation
    /// context, and pending checks, in the order they arrive, until `quit` is received
    /// or `input` disconnects.
    pub fn run(&mut self, input: Receiver<String>) -> Result<()> {
        self.mark_ready();

        loop {
            // Only listen to the ticker while something is waiting on it
            let ticker = if self.needs_tick() {
                self.ticker.clone()
            } else {
                never()
            };
            let messages = self
                .coordinator
                .as_ref()
                .map(|coordinator| coordinator.receiver().clone())
                .unwrap_or_else(never);

            let flow = select! {
                recv(input) -> line => match line {
                    Ok(line) => self.handle_line(&line)?,
                    Err(_) => {
                        self.logs.info("Input closed");
                        ControlFlow::Break(())
                    }
                },
                recv(messages) -> message => {
                    self.handle_worker_message(message);
                    ControlFlow::Continue(())
                }
                recv(ticker) -> _ => {
                    self.tick()?;
                    ControlFlow::Continue(())
                }
            };

            if flow.is_break() {
                return Ok(());
            }
        }
    }

    /// Handles one raw line of input, returning [`ControlFlow::Break`] if the engine should exit.
    pub fn handle_line(&mut self, line: &str) -> Result<ControlFlow<()>> {
        let line = line.trim_end_matches(['\r', '\n']);

        // Ignore empty lines
        if line.trim().is_empty() {
            return Ok(ControlFlow::Continue(()));
        }

        // Bytes that weren't UTF-8 were replaced when the line was read
        if line.contains(char::REPLACEMENT_CHARACTER) {
            self.warn(format!("Ignoring input that is not valid UTF-8: {line:?}"))?;
            return Ok(ControlFlow::Continue(()));
        }

        self.logs.info(format!("Received raw line: {line:?}"));
        self.state.add(LifecycleFlag::ReceivedUci);
        let flow = self.process_line(line);
        self.state.remove(LifecycleFlag::ReceivedUci);

        flow
    }

    fn process_line(&mut self, line: &str) -> Result<ControlFlow<()>> {
        let cmd = match Command::parse(line) {
            Ok(cmd) => cmd,

            // Per the protocol, bad input is ignored and the engine keeps going
            Err(err) => {
                self.warn(format!("Ignoring {line:?}: {}", EngineError::from(err)))?;
                return Ok(ControlFlow::Continue(()));
            }
        };

        if cmd == Command::Unknown {
            self.send(format!("Unknown command: {line}"))?;
            self.logs.info(format!("Unknown UCI command: {line:?}"));
            return Ok(ControlFlow::Continue(()));
        }

        let exit = cmd == Command::Exit;
        self.dispatch(cmd)?;

        Ok(if exit {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        })
    }

    /// Executes a single parsed [`Command`].
    ///
    /// `quit` is only recorded here; shutting down is up to the caller.
    pub fn dispatch(&mut self, cmd: Command) -> Result<()> {
        self.logs.info(format!("Dispatching {cmd:?}"));

        match cmd {
            Command::Uci => self.uci()?,

            Command::Debug { on } => self.set_debug(on)?,

            Command::IsReady => self.is_ready()?,

            Command::SetOption { name, value } => self.set_option(&name, &value)?,

            Command::Register => {
                self.send_string(format!("{} requires no registration", self.name()))?
            }

            Command::UciNewGame => self.search.new_game(),

            Command::Position { fen, moves } => self
                .search
                .set_position(fen.as_deref(), moves.as_deref().unwrap_or_default()),

            Command::Go(options) => self.go(&options)?,

            Command::Stop => self.stop(),

            Command::PonderHit => self.search.ponder_hit(),

            Command::Exit => self.logs.info("Exit requested"),

            Command::Unknown => self.logs.warning("Unknown commands are never dispatched"),
        }

        Ok(())
    }

    /// Performs one round of every repeating check.
    ///
    /// Concludes the current search if it has finished, and answers pending `isready`s
    /// once the engine is ready.
    pub fn tick(&mut self) -> Result<()> {
        if self.state.is_set(LifecycleFlag::Thinking) && !self.search.is_running() {
            self.state.remove(LifecycleFlag::Thinking);
            self.logs.info("Search concluded");
        }

        if self.readiness_checks.is_empty() {
            return Ok(());
        }

        if self.state.is_set(LifecycleFlag::Ready) {
            // Exactly one `readyok` for each `isready` received
            let pending = std::mem::take(&mut self.readiness_checks);
            for _ in pending {
                self.send("readyok")?;
            }
        } else if let Some(timeout) = self.config.ready_timeout {
            let before = self.readiness_checks.len();
            self.readiness_checks
                .retain(|received| received.elapsed() < timeout);

            let expired = before - self.readiness_checks.len();
            if expired > 0 {
                self.warn(format!(
                    "Gave up on {expired} isready after {timeout:?} without becoming ready"
                ))?;
            }
        }

        Ok(())
    }

    /// Marks the engine as exiting, terminates the calculation context, and runs every
    /// teardown callback.
    ///
    /// Returns the errors of the termination and of any callbacks that failed.
    pub fn shutdown(&mut self) -> Vec<anyhow::Error> {
        self.state.add(LifecycleFlag::Exiting);
        self.logs.info(format!("Shutting down ({})", self.state));

        if self.state.is_set(LifecycleFlag::Thinking) {
            self.stop();
        }

        let mut errors = Vec::new();
        if let Err(err) = self.terminate_calculation() {
            errors.push(err.context("Failed to terminate the calculation context"));
        }
        errors.extend(self.teardown.run());
        errors
    }

    /// Asks the calculation context to stop and joins its thread.
    ///
    /// Messages it sends until it exits are still handled, so none of its logs are lost.
    fn terminate_calculation(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.request_termination();

        if let Some(coordinator) = self.coordinator.take() {
            // Ends once the calculation context drops its end of the channel
            for message in coordinator.receiver().iter() {
                if let Err(err) = coordinator.handle(message, &mut self.options, &self.logs) {
                    self.logs
                        .trace(format!("Calculation context left before a reply: {err}"));
                }
            }
        }

        worker.terminate()
    }

    /// Records a fatal error, before the caller shuts the engine down.
    pub fn fail(&mut self, err: impl fmt::Display) {
        self.state.add(LifecycleFlag::Error);
        self.state.add(LifecycleFlag::Exiting);
        self.logs.fatal(err);
    }

    /// Returns `true` if something is waiting on the ticker.
    fn needs_tick(&self) -> bool {
        !self.readiness_checks.is_empty() || self.state.is_set(LifecycleFlag::Thinking)
    }

    fn handle_worker_message(&mut self, message: Result<Message, RecvError>) {
        let handled = match (message, &self.coordinator) {
            (Ok(message), Some(coordinator)) => {
                coordinator.handle(message, &mut self.options, &self.logs)
            }
            (Ok(_), None) => Ok(()),
            (Err(_), _) => Err(ChannelError::Disconnected),
        };

        if let Err(err) = handled {
            self.calculation_lost(err);
        }
    }

    /// The calculation context is unreachable; only the search in progress suffers for it.
    fn calculation_lost(&mut self, err: impl fmt::Display) {
        self.logs.error(format!("Lost the calculation context: {err}"));
        self.coordinator = None;

        if self.state.is_set(LifecycleFlag::Thinking) {
            self.stop();
        }
    }

    /// Called when the engine receives the `uci` command.
    ///
    /// Prints engine's ID, version, and authors, and lists all UCI options.
    fn uci(&mut self) -> Result<()> {
        self.send(format!("id name {}", self.name()))?;
        self.send(format!("id author {}", self.authors()))?;

        // `Debug` is toggled through the `debug` command instead
        for key in OptionKey::ALL.into_iter().filter(|&key| key != OptionKey::Debug) {
            self.send(key.declaration())?;
        }

        self.send("uciok")
    }

    fn set_debug(&mut self, on: bool) -> Result<()> {
        if self.options.debug() == on {
            self.logs.trace(format!("Debug is already {on}"));
            return Ok(());
        }

        self.options.set(OptionKey::Debug, on.into())?;
        self.logs.info(format!("Debug set to {on}"));
        Ok(())
    }

    fn is_ready(&mut self) -> Result<()> {
        if self.state.is_set(LifecycleFlag::Ready) {
            return self.send("readyok");
        }

        self.logs.info(format!(
            "Not ready yet ({}); checking again every {:?}",
            self.state, self.config.tick
        ));
        self.readiness_checks.push(Instant::now());
        Ok(())
    }

    /// Handles the `setoption` command, setting option `name` to `value`.
    ///
    /// Unrecognized options and invalid values are reported and ignored.
    fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        let Some(key) = OptionKey::from_name(name) else {
            return self.warn(format!("Unrecognized option {name:?} with value {value:?}"));
        };

        match self.options.set_from_str(key, value) {
            Ok(value) => {
                self.logs.info(format!("Option {key} set to {value}"));
                if self.options.debug() {
                    self.send_string(format!("Option {key} set to {value}"))?;
                }
                Ok(())
            }
            Err(err) => self.warn(err),
        }
    }

    fn go(&mut self, options: &GoOptions) -> Result<()> {
        // Cannot start a search if one is already running
        if self.state.is_set(LifecycleFlag::Thinking) {
            return self.warn("A search is already running");
        }

        self.search.start(options);
        self.state.add(LifecycleFlag::Thinking);
        Ok(())
    }

    fn stop(&mut self) {
        self.search.stop();
        if self.state.is_set(LifecycleFlag::Thinking) {
            self.state.remove(LifecycleFlag::Thinking);
            self.logs.info("Search stopped");
        }
    }

    /// Writes a line to the protocol output, and records it in the log.
    fn send(&mut self, line: impl fmt::Display) -> Result<()> {
        let line = line.to_string();
        writeln!(self.out, "{line}").context("Failed to write to the protocol output")?;
        self.out
            .flush()
            .context("Failed to flush the protocol output")?;
        self.logs.output(line);
        Ok(())
    }

    /// Helper to send an `info string` message.
    #[inline(always)]
    fn send_string(&mut self, info: impl fmt::Display) -> Result<()> {
        self.send(format!("info string {info}"))
    }

    /// Logs a warning, also sending it as an `info string` in debug mode.
    fn warn(&mut self, message: impl fmt::Display) -> Result<()> {
        let message = message.to_string();
        self.logs.warning(&message);
        if self.options.debug() {
            self.send_string(message)?;
        }
        Ok(())
    }
}

impl<W: Write> fmt::Debug for Engine<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("readiness_checks", &self.readiness_checks.len())
            .field("teardown", &self.teardown)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Spawns a thread that reads `stdin` line by line, returning the receiving end.
///
/// The channel disconnects once `stdin` reaches end-of-file.
pub fn stdin_lines() -> Result<Receiver<String>> {
    read_lines(BufReader::new(io::stdin()))
}

/// Spawns a thread that reads `reader` line by line, returning the receiving end.
///
/// Invalid UTF-8 is replaced with [`char::REPLACEMENT_CHARACTER`] rather than ending the input.
pub fn read_lines<R: BufRead + Send + 'static>(reader: R) -> Result<Receiver<String>> {
    let (sender, receiver) = unbounded();

    thread::Builder::new()
        .name(String::from("input"))
        .spawn(move || {
            if let Err(err) = input_handler(reader, sender) {
                eprintln!("Input handler thread stopping after fatal error: {err:#}");
            }
        })
        .context("Failed to spawn the input thread")?;

    Ok(receiver)
}

/// Loops endlessly to await input via `reader`, sending every line through `sender`.
fn input_handler<R: BufRead>(mut reader: R, sender: Sender<String>) -> Result<()> {
    let mut buffer = Vec::with_capacity(2048); // Seems like a good amount of space to pre-allocate

    loop {
        buffer.clear();
        let bytes = reader
            .read_until(b'\n', &mut buffer)
            .context("Failed to read line when parsing UCI commands")?;

        // For ctrl + d
        if 0 == bytes {
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buffer);
        sender
            .send(line.trim_end_matches(['\r', '\n']).to_string())
            .context("Failed to send input to the engine")?;
    }
}

//! Background fetch loop. At most one worker thread exists at a time; the
//! foreground talks to it over crossbeam channels and never shares state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bscwatch_explorer::Explorer;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::fetch::{run_cycle, CycleReport, FetchRequest, FetchState};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);
const WAIT_STEP: Duration = Duration::from_millis(100);

/// Builds the explorer a cycle talks to from the current request.
pub type Connector = Arc<dyn Fn(&FetchRequest) -> Box<dyn Explorer> + Send + Sync>;

pub fn http_connector() -> Connector {
    Arc::new(|request: &FetchRequest| Box::new(request.connect()) as Box<dyn Explorer>)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollerState {
    Idle,
    Running,
}

#[derive(Clone, Debug)]
pub enum Control {
    Update(FetchRequest),
    FetchNow,
}

#[derive(Debug)]
pub enum PollEvent {
    Report(Box<CycleReport>),
    /// The automatic loop has exited.
    Stopped,
}

#[derive(Debug, Eq, PartialEq)]
pub enum PollerError {
    /// The previous worker is still finishing its last cycle.
    Stopping,
    Spawn(String),
}

impl fmt::Display for PollerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollerError::Stopping => write!(f, "poller is still stopping; try again shortly"),
            PollerError::Spawn(message) => write!(f, "failed to start poller: {message}"),
        }
    }
}

impl std::error::Error for PollerError {}

pub struct Poller {
    connector: Connector,
    interval: Duration,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<FetchState>>,
    control_tx: Option<Sender<Control>>,
    events_tx: Sender<PollEvent>,
    events_rx: Receiver<PollEvent>,
    fetch_state: FetchState,
}

impl Poller {
    pub fn new(connector: Connector, interval: Duration) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            connector,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            control_tx: None,
            events_tx,
            events_rx,
            fetch_state: FetchState::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> PollerState {
        if self.running.load(Ordering::SeqCst) {
            PollerState::Running
        } else {
            PollerState::Idle
        }
    }

    /// True while a worker thread (automatic or one-shot) has not finished.
    pub fn is_busy(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    pub fn events(&self) -> &Receiver<PollEvent> {
        &self.events_rx
    }

    pub fn try_event(&self) -> Option<PollEvent> {
        match self.events_rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Starts the automatic loop. While it is already running the request
    /// replaces the loop's snapshot instead.
    pub fn start(&mut self, request: FetchRequest) -> Result<(), PollerError> {
        if self.state() == PollerState::Running {
            self.update(request);
            return Ok(());
        }
        self.reap()?;

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        self.running.store(true, Ordering::SeqCst);
        let worker = AutoLoop {
            connector: Arc::clone(&self.connector),
            interval: self.interval,
            running: Arc::clone(&self.running),
            control_rx,
            events_tx: self.events_tx.clone(),
        };
        let state = self.fetch_state;
        let spawned = thread::Builder::new()
            .name("bscwatch-poller".to_string())
            .spawn(move || worker.run(request, state));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                self.control_tx = Some(control_tx);
                log_info!("Poller started (interval {}s)", self.interval.as_secs());
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(PollerError::Spawn(err.to_string()))
            }
        }
    }

    /// Clears the run flag. An in-flight request completes and its report is
    /// still delivered.
    pub fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log_info!("Poller stopping");
        }
    }

    /// Hands a fresh snapshot to a running loop; ignored while idle.
    pub fn update(&self, request: FetchRequest) {
        if self.state() != PollerState::Running {
            return;
        }
        if let Some(control_tx) = self.control_tx.as_ref() {
            let _ = control_tx.send(Control::Update(request));
        }
    }

    /// A single fetch. While the loop runs this cuts its current wait short;
    /// while idle it runs one cycle on the worker slot.
    pub fn run_once(&mut self, request: FetchRequest) -> Result<(), PollerError> {
        if self.state() == PollerState::Running {
            if let Some(control_tx) = self.control_tx.as_ref() {
                let _ = control_tx.send(Control::Update(request));
                let _ = control_tx.send(Control::FetchNow);
            }
            return Ok(());
        }
        self.reap()?;

        let connector = Arc::clone(&self.connector);
        let events_tx = self.events_tx.clone();
        let mut state = self.fetch_state;
        let spawned = thread::Builder::new()
            .name("bscwatch-fetch".to_string())
            .spawn(move || {
                let explorer = connector(&request);
                let report = run_cycle(explorer.as_ref(), &request, &mut state);
                let _ = events_tx.send(PollEvent::Report(Box::new(report)));
                state
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => Err(PollerError::Spawn(err.to_string())),
        }
    }

    /// Stops the loop and waits up to `grace` for the worker. Returns whether
    /// it finished in time; a worker stuck in a request is left to exit alone.
    pub fn shutdown(&mut self, grace: Duration) -> bool {
        self.stop();
        let deadline = Instant::now() + grace;
        while self.is_busy() {
            if Instant::now() >= deadline {
                log_debug!("Poller still busy after {}ms", grace.as_millis());
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        let _ = self.reap();
        true
    }

    /// Joins a finished worker and keeps the state it ended with.
    fn reap(&mut self) -> Result<(), PollerError> {
        if self.is_busy() {
            return Err(PollerError::Stopping);
        }
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(state) => self.fetch_state = state,
                Err(_) => log_error!("Poller worker panicked"),
            }
        }
        self.control_tx = None;
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown(SHUTDOWN_GRACE);
    }
}

struct AutoLoop {
    connector: Connector,
    interval: Duration,
    running: Arc<AtomicBool>,
    control_rx: Receiver<Control>,
    events_tx: Sender<PollEvent>,
}

impl AutoLoop {
    fn run(self, mut request: FetchRequest, mut state: FetchState) -> FetchState {
        while self.running.load(Ordering::SeqCst) {
            while let Ok(control) = self.control_rx.try_recv() {
                if let Control::Update(next) = control {
                    request = next;
                }
            }
            let explorer = (self.connector)(&request);
            let report = run_cycle(explorer.as_ref(), &request, &mut state);
            if self.events_tx.send(PollEvent::Report(Box::new(report))).is_err() {
                break;
            }
            self.wait(&mut request);
        }
        let _ = self.events_tx.send(PollEvent::Stopped);
        log_info!("Poller stopped");
        state
    }

    /// Sleeps out the interval in short steps, applying snapshot updates.
    fn wait(&self, request: &mut FetchRequest) {
        let deadline = Instant::now() + self.interval;
        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let step = (deadline - now).min(WAIT_STEP);
            match self.control_rx.recv_timeout(step) {
                Ok(Control::Update(next)) => *request = next,
                Ok(Control::FetchNow) => return,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => thread::sleep(step),
            }
        }
    }
}

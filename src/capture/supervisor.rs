//! Capture lifecycle: start with retry, stop, and the background monitor that
//! runs the start watchdog, the post-start health check, the silence detector,
//! and route-change restarts.
//!
//! `request_start` runs in the caller's task. Everything driven by engine
//! events or timers runs on one monitor task. The two meet in
//! `SupervisorState`, where a generation counter lets a stop cancel any start
//! or restart that is still in flight.

use super::engine::{CaptureEngine, CaptureEngineEvent, EnginePhase};
use super::silence::SilenceDetector;
use super::CaptureConfig;
use crate::app::logging::Logger;
use crate::error::CaptureError;
use crate::lock_or_recover;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

/// What the supervisor reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Engine confirmed audio is flowing.
    Listening,
    Transcript { text: String, is_final: bool },
    Level(f32),
    SilenceTimeout,
    /// `recoverable` is true when capture is still running after the error.
    Error { error: CaptureError, recoverable: bool },
    /// Capture ended without a stop request.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { attempts: u32 },
    /// A stop arrived before the start finished; nothing is capturing.
    Cancelled,
}

/// Claim on a capture start; see [`CaptureSupervisor::begin_start`].
#[derive(Debug)]
#[must_use]
pub struct StartTicket {
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Watchdog {
    started: Instant,
    deadline: Instant,
    extended: bool,
}

struct SupervisorState {
    generation: u64,
    starting: bool,
    active: bool,
    confirmed_generation: Option<u64>,
    watchdog: Option<Watchdog>,
    health_check_at: Option<Instant>,
    silent_restarts: u32,
    last_restart: Option<Instant>,
    silence: SilenceDetector,
}

impl SupervisorState {
    fn clear_timers(&mut self) {
        self.watchdog = None;
        self.health_check_at = None;
        self.silence.reset();
    }
}

enum AttemptError {
    Cancelled,
    Failed(CaptureError),
}

struct Inner {
    engine: Arc<dyn CaptureEngine>,
    config: CaptureConfig,
    state: Mutex<SupervisorState>,
    wake: Notify,
    events: mpsc::UnboundedSender<CaptureEvent>,
    log: Logger,
}

pub struct CaptureSupervisor {
    inner: Arc<Inner>,
    monitor: JoinHandle<()>,
}

impl CaptureSupervisor {
    /// `engine_events` is the receiving end of the channel the engine was built with.
    pub fn new(
        engine: Arc<dyn CaptureEngine>,
        engine_events: mpsc::UnboundedReceiver<CaptureEngineEvent>,
        config: CaptureConfig,
        events: mpsc::UnboundedSender<CaptureEvent>,
        log: Logger,
    ) -> Self {
        let silence = SilenceDetector::new(config.silence.clone());
        let inner = Arc::new(Inner {
            engine,
            config,
            state: Mutex::new(SupervisorState {
                generation: 0,
                starting: false,
                active: false,
                confirmed_generation: None,
                watchdog: None,
                health_check_at: None,
                silent_restarts: 0,
                last_restart: None,
                silence,
            }),
            wake: Notify::new(),
            events,
            log,
        });
        let monitor = tokio::spawn(monitor_loop(Arc::clone(&inner), engine_events));
        Self { inner, monitor }
    }

    /// Start capturing, retrying transient failures.
    ///
    /// Permission failures return immediately. A `request_stop` issued while
    /// this is pending turns the result into [`StartOutcome::Cancelled`].
    pub async fn request_start(&self) -> Result<StartOutcome, CaptureError> {
        let ticket = self.begin_start();
        self.complete_start(ticket).await
    }

    /// Synchronous half of [`request_start`](Self::request_start): claims the
    /// start so that any later `request_stop` cancels it, even if
    /// [`complete_start`](Self::complete_start) runs on another task.
    pub fn begin_start(&self) -> StartTicket {
        let mut state = self.inner.state();
        state.generation += 1;
        state.starting = true;
        state.active = false;
        state.clear_timers();
        StartTicket {
            generation: state.generation,
        }
    }

    pub async fn complete_start(&self, ticket: StartTicket) -> Result<StartOutcome, CaptureError> {
        let inner = &self.inner;
        let generation = ticket.generation;

        let result = inner
            .config
            .start_backoff
            .retry(
                |attempt| async move {
                    inner.log.debug(&format!("capture start attempt {attempt}"));
                    inner.attempt_start(generation).await
                },
                |err: &AttemptError| {
                    matches!(err, AttemptError::Failed(err) if !err.is_permission())
                },
            )
            .await;

        match result {
            Ok(((), attempts)) => {
                let now = Instant::now();
                let outcome = {
                    let mut state = inner.state();
                    if state.generation != generation {
                        // Superseded. Only undo the engine start if nothing newer is using it.
                        Err(!state.starting && !state.active)
                    } else {
                        state.starting = false;
                        state.active = true;
                        state.silent_restarts = 0;
                        state.health_check_at = Some(now + inner.config.health_check_delay);
                        if state.confirmed_generation != Some(generation) {
                            state.watchdog = Some(Watchdog {
                                started: now,
                                deadline: now + inner.config.watchdog_timeout,
                                extended: false,
                            });
                        }
                        Ok(())
                    }
                };
                match outcome {
                    Ok(()) => {
                        inner.wake.notify_one();
                        inner
                            .log
                            .info(&format!("capture started after {attempts} attempt(s)"));
                        Ok(StartOutcome::Started { attempts })
                    }
                    Err(undo) => {
                        if undo {
                            inner.engine.stop(true).await;
                        }
                        inner.log.debug("capture start cancelled by stop");
                        Ok(StartOutcome::Cancelled)
                    }
                }
            }
            Err(AttemptError::Cancelled) => {
                inner.log.debug("capture start cancelled by stop");
                Ok(StartOutcome::Cancelled)
            }
            Err(AttemptError::Failed(err)) => {
                {
                    let mut state = inner.state();
                    if state.generation == generation {
                        state.starting = false;
                    }
                }
                inner.log.warn(&format!("capture start failed: {err}"));
                Err(err)
            }
        }
    }

    /// Stop capturing. Safe to call repeatedly and before any start.
    pub async fn request_stop(&self, clear_buffer: bool) {
        let engaged = {
            let mut state = self.inner.state();
            let engaged = state.active || state.starting;
            state.generation += 1;
            state.active = false;
            state.starting = false;
            state.clear_timers();
            engaged
        };
        if engaged {
            self.inner.engine.stop(clear_buffer).await;
            self.inner.log.debug("capture stopped");
        }
        self.inner.wake.notify_one();
    }

    pub fn is_active(&self) -> bool {
        self.inner.state().active
    }

    pub fn is_starting(&self) -> bool {
        self.inner.state().starting
    }
}

impl Drop for CaptureSupervisor {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SupervisorState> {
        lock_or_recover(&self.state, "capture state")
    }

    fn emit(&self, event: CaptureEvent) {
        let _ = self.events.send(event);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state().generation == generation
    }

    /// Poll the input format a few times; a device mid-switch reports zeros briefly.
    async fn wait_for_format(&self) -> Result<(), CaptureError> {
        let polls = self.config.format_polls.max(1);
        let mut format = self.engine.input_format();
        for poll in 1..=polls {
            if format.is_ready() {
                return Ok(());
            }
            if poll < polls {
                sleep(self.config.format_poll_interval).await;
                format = self.engine.input_format();
            }
        }
        Err(CaptureError::EngineUnavailable(format!(
            "input format not ready ({} ch @ {} Hz)",
            format.channels, format.sample_rate
        )))
    }

    async fn attempt_start(&self, generation: u64) -> Result<(), AttemptError> {
        if !self.is_current(generation) {
            return Err(AttemptError::Cancelled);
        }
        self.wait_for_format().await.map_err(AttemptError::Failed)?;
        if !self.is_current(generation) {
            return Err(AttemptError::Cancelled);
        }
        self.engine.start().await.map_err(AttemptError::Failed)
    }

    fn next_deadline(&self) -> Option<Instant> {
        let state = self.state();
        if !state.active {
            return None;
        }
        [
            state.silence.deadline(),
            state.watchdog.map(|watchdog| watchdog.deadline),
            state.health_check_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Drop to inactive if `generation` is still current. Returns whether it was.
    fn deactivate(&self, generation: u64) -> bool {
        let mut state = self.state();
        if state.generation != generation || !state.active {
            return false;
        }
        state.generation += 1;
        state.active = false;
        state.clear_timers();
        true
    }

    /// Returns true when a final transcript was forwarded.
    async fn handle_engine_event(&self, event: CaptureEngineEvent) -> bool {
        match event {
            CaptureEngineEvent::Listening => {
                let forward = {
                    let mut state = self.state();
                    if state.active || state.starting {
                        state.confirmed_generation = Some(state.generation);
                        state.watchdog = None;
                        true
                    } else {
                        false
                    }
                };
                if forward {
                    self.emit(CaptureEvent::Listening);
                }
            }
            CaptureEngineEvent::Transcript { text, is_final } => {
                let forward = {
                    let mut state = self.state();
                    if is_final && state.active {
                        state.silence.disarm();
                    }
                    state.active || state.starting
                };
                if forward {
                    self.log.content(&format!("transcript (final={is_final}): {text}"));
                    self.emit(CaptureEvent::Transcript { text, is_final });
                    return is_final;
                }
            }
            CaptureEngineEvent::Level(level) => {
                let forward = {
                    let mut state = self.state();
                    if state.active {
                        state.silence.observe(level, Instant::now());
                    }
                    state.active
                };
                if forward {
                    self.emit(CaptureEvent::Level(level.clamp(0.0, 1.0)));
                }
            }
            CaptureEngineEvent::StateChanged(phase) => {
                self.log.debug(&format!("capture engine phase {phase:?}"));
            }
            CaptureEngineEvent::ConfigurationChanged => self.handle_route_change().await,
            CaptureEngineEvent::Error(error) => {
                let generation = {
                    let state = self.state();
                    state.active.then_some(state.generation)
                };
                match generation {
                    Some(generation) if error.is_permission() => {
                        self.fail(generation, error).await
                    }
                    Some(generation) => {
                        self.log
                            .warn(&format!("capture engine error: {error}; restarting"));
                        self.state().last_restart = Some(Instant::now());
                        self.restart_or_fail(generation, Some(error)).await;
                    }
                    None => self
                        .log
                        .debug(&format!("capture engine error while not capturing: {error}")),
                }
            }
        }
        false
    }

    async fn handle_route_change(&self) {
        let now = Instant::now();
        let generation = {
            let mut state = self.state();
            if !state.active {
                return;
            }
            if let Some(last) = state.last_restart {
                if now.duration_since(last) < self.config.restart_grace {
                    self.log
                        .debug("audio route changed during restart grace; ignoring");
                    return;
                }
            }
            state.last_restart = Some(now);
            state.generation
        };
        self.log.info("audio route changed; restarting capture");
        self.restart_or_fail(generation, None).await;
    }

    async fn handle_timers(&self, engine_events: &mut mpsc::UnboundedReceiver<CaptureEngineEvent>) {
        let now = Instant::now();
        let (silence_fired, watchdog, health_due, generation) = {
            let mut state = self.state();
            if !state.active {
                return;
            }
            let silence_fired = state.silence.poll(now);
            let watchdog = state.watchdog.filter(|watchdog| watchdog.deadline <= now);
            let health_due = state.health_check_at.is_some_and(|at| at <= now);
            if health_due {
                state.health_check_at = None;
            }
            (silence_fired, watchdog, health_due, state.generation)
        };

        if silence_fired {
            // An engine final already queued takes precedence over the timeout.
            let mut final_seen = false;
            while let Ok(event) = engine_events.try_recv() {
                final_seen |= self.handle_engine_event(event).await;
            }
            if final_seen {
                self.log.debug("final transcript arrived with silence timeout");
            } else if self.is_current(generation) {
                self.log.debug("silence timeout");
                self.emit(CaptureEvent::SilenceTimeout);
            }
        }
        if let Some(watchdog) = watchdog {
            self.handle_watchdog(generation, watchdog, now).await;
        }
        if health_due {
            self.handle_health_check(generation).await;
        }
    }

    async fn handle_watchdog(&self, generation: u64, watchdog: Watchdog, now: Instant) {
        let phase = self.engine.phase();
        {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            match phase {
                EnginePhase::Running => {
                    state.watchdog = None;
                    self.log
                        .debug("capture running without listening confirmation");
                    return;
                }
                EnginePhase::Starting if !watchdog.extended => {
                    state.watchdog = Some(Watchdog {
                        deadline: watchdog.started + self.config.watchdog_ceiling,
                        extended: true,
                        ..watchdog
                    });
                    self.log.info("capture still starting; extending watchdog");
                    return;
                }
                _ => {
                    state.watchdog = None;
                    state.last_restart = Some(now);
                }
            }
        }
        self.log
            .warn("no listening confirmation from capture engine; forcing restart");
        self.restart_or_fail(
            generation,
            Some(CaptureError::EngineUnavailable(
                "capture engine did not confirm listening; restarted".to_string(),
            )),
        )
        .await;
    }

    async fn handle_health_check(&self, generation: u64) {
        match self.engine.phase() {
            EnginePhase::Running => {
                self.log.debug("capture health check passed");
                return;
            }
            EnginePhase::Starting => {
                let mut state = self.state();
                if state.generation == generation {
                    state.health_check_at = Some(Instant::now() + self.config.health_check_delay);
                }
                return;
            }
            EnginePhase::Idle => {}
        }
        let restarts = {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            state.silent_restarts += 1;
            state.silent_restarts
        };
        if restarts > self.config.max_silent_restarts {
            self.fail(
                generation,
                CaptureError::EngineUnavailable("capture engine keeps stopping".to_string()),
            )
            .await;
            return;
        }
        self.log
            .info(&format!("capture engine not running; silent restart {restarts}"));
        self.restart_or_fail(generation, None).await;
    }

    /// Stop and start the engine under the current generation, retrying
    /// transient start failures like `request_start` does.
    /// `Ok(false)` means a stop superseded the restart.
    async fn restart(&self, generation: u64) -> Result<bool, CaptureError> {
        self.engine.stop(false).await;
        let result = self
            .config
            .start_backoff
            .retry(
                |attempt| async move {
                    if attempt > 1 {
                        self.log.debug(&format!("capture restart attempt {attempt}"));
                    }
                    self.attempt_start(generation).await
                },
                |err: &AttemptError| {
                    matches!(err, AttemptError::Failed(err) if !err.is_permission())
                },
            )
            .await;
        match result {
            Ok(_) => {}
            Err(AttemptError::Cancelled) => return Ok(false),
            Err(AttemptError::Failed(err)) => return Err(err),
        }
        let now = Instant::now();
        {
            let mut state = self.state();
            if state.generation == generation {
                state.watchdog = Some(Watchdog {
                    started: now,
                    deadline: now + self.config.watchdog_timeout,
                    extended: false,
                });
                state.health_check_at = Some(now + self.config.health_check_delay);
                state.silence.reset();
                return Ok(true);
            }
        }
        self.engine.stop(true).await;
        Ok(false)
    }

    async fn restart_or_fail(&self, generation: u64, notice: Option<CaptureError>) {
        match self.restart(generation).await {
            Ok(true) => {
                if let Some(error) = notice {
                    self.emit(CaptureEvent::Error {
                        error,
                        recoverable: true,
                    });
                }
            }
            Ok(false) => {}
            Err(error) => self.fail(generation, error).await,
        }
    }

    async fn fail(&self, generation: u64, error: CaptureError) {
        if !self.deactivate(generation) {
            return;
        }
        self.log.warn(&format!("capture stopped: {error}"));
        self.engine.stop(true).await;
        self.emit(CaptureEvent::Error {
            error,
            recoverable: false,
        });
        self.emit(CaptureEvent::Stopped);
    }
}

async fn monitor_loop(
    inner: Arc<Inner>,
    mut engine_events: mpsc::UnboundedReceiver<CaptureEngineEvent>,
) {
    loop {
        let deadline = inner.next_deadline();
        tokio::select! {
            biased;
            event = engine_events.recv() => match event {
                Some(event) => {
                    inner.handle_engine_event(event).await;
                }
                None => {
                    inner.log.debug("capture engine channel closed");
                    return;
                }
            },
            _ = sleep_until_opt(deadline) => inner.handle_timers(&mut engine_events).await,
            _ = inner.wake.notified() => {}
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

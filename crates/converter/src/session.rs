//! Conversion session state machine and the orchestrator that drives it.
//!
//! The orchestrator owns exactly one [`Session`] and one engine handle. It
//! consumes user [`Command`]s one at a time. While a session is active,
//! commands are answered at every suspension point instead of queueing, and
//! during an encode the engine's log lines are consumed in order on the same
//! task. Every state
//! change replaces the session value rather than editing it in place.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::command::{CommandBuilder, OUTPUT_NAME};
use crate::config::ConverterConfig;
use crate::device::DeviceProfile;
use crate::engine::{EncodingEngine, EngineFactory};
use crate::error::{ConversionError, ErrorKind};
use crate::ffmpeg::FfmpegEngineFactory;
use crate::ffprobe::{DurationProbe, FfprobeDurationProbe};
use crate::params::{check_image_format, ParameterSelector};
use crate::progress::{ProgressMonitor, ProgressSample};
use crate::resize::{ImageResizer, JpegResizer};
use crate::sink::{suggested_output_name, ArtifactSink};
use crate::stager::{MediaInputs, MediaStager};

/// What the user asked to convert
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub inputs: MediaInputs,
    /// Output width picked by the user; the configured default when absent
    pub requested_width: Option<u32>,
}

/// User actions, consumed in arrival order
#[derive(Debug)]
pub enum Command {
    Start(ConversionRequest),
    Cancel,
    Save,
    Reset,
}

/// Finished video held until saved or discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Validating,
    Staging,
    Encoding { progress: Option<ProgressSample> },
    Completed(OutputArtifact),
    Canceled,
    Failed(ConversionError),
}

/// Payload-free view of [`SessionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Idle,
    Validating,
    Staging,
    Encoding,
    Completed,
    Canceled,
    Failed,
}

impl StateKind {
    /// A session in one of these states owns the engine
    pub fn is_active(self) -> bool {
        matches!(self, StateKind::Validating | StateKind::Staging | StateKind::Encoding)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StateKind::Completed | StateKind::Canceled | StateKind::Failed)
    }

    pub fn can_transition_to(self, next: StateKind) -> bool {
        use StateKind::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Staging)
                | (Validating, Failed)
                | (Staging, Encoding)
                | (Staging, Failed)
                | (Encoding, Encoding)
                | (Encoding, Completed)
                | (Encoding, Canceled)
                | (Encoding, Failed)
                | (Completed, Idle)
                | (Canceled, Idle)
                | (Failed, Idle)
        )
    }
}

impl SessionState {
    pub fn kind(&self) -> StateKind {
        match self {
            SessionState::Idle => StateKind::Idle,
            SessionState::Validating => StateKind::Validating,
            SessionState::Staging => StateKind::Staging,
            SessionState::Encoding { .. } => StateKind::Encoding,
            SessionState::Completed(_) => StateKind::Completed,
            SessionState::Canceled => StateKind::Canceled,
            SessionState::Failed(_) => StateKind::Failed,
        }
    }
}

/// One end-to-end attempt to produce a video
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    state: SessionState,
}

impl Session {
    fn new() -> Self {
        Session {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            state: SessionState::Idle,
        }
    }

    /// Same session, new state
    fn with_state(&self, state: SessionState) -> Session {
        Session {
            id: self.id,
            created_at: self.created_at,
            state,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }
}

/// Published to whoever drives the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    State { session_id: Uuid, state: StateKind },
    Status { message: String },
    Progress { session_id: Uuid, percent: f64, eta_secs: Option<f64> },
    StartRejected { active_session: Uuid },
    Failed { session_id: Uuid, kind: ErrorKind, message: String },
    Completed { session_id: Uuid, name: String, bytes: usize },
    Saved { session_id: Uuid, path: PathBuf },
}

/// External services the orchestrator depends on
pub struct Collaborators {
    pub engines: Box<dyn EngineFactory>,
    pub resizer: Arc<dyn ImageResizer>,
    pub probe: Arc<dyn DurationProbe>,
    pub sink: Arc<dyn ArtifactSink>,
}

impl Collaborators {
    /// ffmpeg/ffprobe binaries plus the `image`-crate resizer
    pub fn native(config: &ConverterConfig, sink: Arc<dyn ArtifactSink>) -> Self {
        Collaborators {
            engines: Box::new(FfmpegEngineFactory::new(config.ffmpeg_bin.clone())),
            resizer: Arc::new(JpegResizer::new()),
            probe: Arc::new(FfprobeDurationProbe::new(config.ffprobe_bin.clone())),
            sink,
        }
    }
}

enum EncodeOutcome {
    Finished(anyhow::Result<()>),
    Canceled,
}

/// Answers user commands that arrive while a session is busy. A second
/// `Start` is rejected, `Save` and `Reset` are dropped, and `Cancel` is
/// remembered until the encode can honour it.
struct CommandGuard<'a> {
    commands: &'a mut mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    session_id: Uuid,
    open: bool,
    cancel_requested: bool,
}

impl<'a> CommandGuard<'a> {
    fn new(
        commands: &'a mut mpsc::Receiver<Command>,
        events: mpsc::UnboundedSender<SessionEvent>,
        session_id: Uuid,
    ) -> Self {
        CommandGuard {
            commands,
            events,
            session_id,
            open: true,
            cancel_requested: false,
        }
    }

    /// Await `work`, handling commands queued before or during it
    async fn watch<F: Future>(&mut self, work: F) -> F::Output {
        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv(), if self.open => self.handle(command),
                output = &mut work => return output,
            }
        }
    }

    fn handle(&mut self, command: Option<Command>) {
        match command {
            Some(Command::Cancel) => {
                debug!("Cancel requested for session {}", self.session_id);
                self.cancel_requested = true;
            }
            Some(Command::Start(_)) => {
                warn!("Start ignored: session {} is still running", self.session_id);
                let _ = self.events.send(SessionEvent::StartRejected {
                    active_session: self.session_id,
                });
            }
            Some(other) => warn!("{:?} ignored while session {} is running", other, self.session_id),
            None => self.open = false,
        }
    }
}

pub struct Orchestrator {
    device: DeviceProfile,
    default_width: u32,
    selector: ParameterSelector,
    stager: MediaStager,
    commands: CommandBuilder,
    engines: Box<dyn EngineFactory>,
    engine: Box<dyn EncodingEngine>,
    probe: Arc<dyn DurationProbe>,
    sink: Arc<dyn ArtifactSink>,
    session: Session,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Orchestrator {
    pub fn new(
        config: &ConverterConfig,
        device: DeviceProfile,
        collaborators: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let engine = collaborators.engines.create();
        let orchestrator = Orchestrator {
            device,
            default_width: config.default_width,
            selector: ParameterSelector::new(config.selection_policy()),
            stager: MediaStager::new(collaborators.resizer, config.default_image.clone()),
            commands: CommandBuilder::new(),
            engines: collaborators.engines,
            engine,
            probe: collaborators.probe,
            sink: collaborators.sink,
            session: Session::new(),
            events,
        };
        (orchestrator, events_rx)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> &SessionState {
        self.session.state()
    }

    /// Process commands until the sender side is dropped, then hand the
    /// orchestrator back for inspection
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Self {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Start(request) => self.start(request, &mut commands).await,
                Command::Cancel => self.cancel().await,
                Command::Save => self.save().await,
                Command::Reset => self.reset().await,
            }
        }
        debug!("Command channel closed, orchestrator stopping");
        self
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine; the state is still tracked here
        let _ = self.events.send(event);
    }

    fn status(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.emit(SessionEvent::Status { message });
    }

    fn transition(&mut self, next: SessionState) {
        let from = self.session.kind();
        let to = next.kind();
        debug_assert!(from.can_transition_to(to), "invalid session transition {:?} -> {:?}", from, to);
        if !from.can_transition_to(to) {
            error!("Invalid session transition {:?} -> {:?}", from, to);
        }

        self.session = self.session.with_state(next);
        if from != to {
            info!("Session {}: {:?} -> {:?}", self.session.id(), from, to);
            if to.is_terminal() {
                let elapsed = Utc::now() - self.session.created_at();
                info!("Session {} ended after {:.1}s", self.session.id(), elapsed.num_milliseconds() as f64 / 1000.0);
            }
            self.emit(SessionEvent::State {
                session_id: self.session.id(),
                state: to,
            });
        }
    }

    async fn start(&mut self, request: ConversionRequest, commands: &mut mpsc::Receiver<Command>) {
        if self.session.kind().is_active() {
            warn!("Start ignored: session {} is still {:?}", self.session.id(), self.session.kind());
            self.emit(SessionEvent::StartRejected {
                active_session: self.session.id(),
            });
            return;
        }

        if let SessionState::Completed(artifact) = self.session.state() {
            info!("Discarding unsaved video {} from session {}", artifact.name, self.session.id());
        }

        self.session = Session::new();
        self.transition(SessionState::Validating);
        self.status("Loading...");

        match self.convert(request, commands).await {
            Ok(artifact) => {
                let (name, bytes) = (artifact.name.clone(), artifact.bytes.len());
                self.transition(SessionState::Completed(artifact));
                self.emit(SessionEvent::Completed {
                    session_id: self.session.id(),
                    name,
                    bytes,
                });
                self.status("Conversion complete!");
            }
            Err(ConversionError::Canceled) => {
                self.transition(SessionState::Canceled);
                self.status("Canceled.");
            }
            Err(err) => {
                if err.is_validation() {
                    warn!("Session {} rejected: {}", self.session.id(), err);
                } else {
                    error!("Session {} failed: {}", self.session.id(), err);
                }
                self.emit(SessionEvent::Failed {
                    session_id: self.session.id(),
                    kind: err.kind(),
                    message: err.to_string(),
                });
                self.status(err.to_string());
                self.transition(SessionState::Failed(err));
            }
        }
    }

    async fn convert(
        &mut self,
        request: ConversionRequest,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Result<OutputArtifact, ConversionError> {
        let inputs = request.inputs;
        let output_name = suggested_output_name(&inputs.audio.name);
        let mut guard = CommandGuard::new(commands, self.events.clone(), self.session.id());

        // Validating: nothing below may touch the engine until this passes
        if let Some(image) = &inputs.image {
            check_image_format(&image.name)?;
        }
        let duration = guard
            .watch(self.probe.probe_duration(&inputs.audio.bytes))
            .await
            .map_err(ConversionError::probe)?;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(ConversionError::ProbeFailed(format!("invalid duration {}", duration)));
        }
        if self.device.is_constrained {
            self.status("Constrained device: optimized for stability.");
        }
        let requested_width = request
            .requested_width
            .filter(|w| *w > 0)
            .unwrap_or(self.default_width);
        let config = self.selector.select(
            duration,
            self.device,
            inputs.audio.bytes.len() as u64,
            &inputs.audio.name,
            requested_width,
        )?;
        self.status(format!("Using {} FPS for optimized encoding...", config.frame_rate));

        self.transition(SessionState::Staging);
        if !self.engine.is_loaded() {
            guard.watch(self.engine.load()).await.map_err(ConversionError::engine)?;
        }
        if inputs.image.is_some() {
            self.status("Optimizing image...");
        }
        let staged = guard
            .watch(self.stager.stage(self.engine.as_mut(), &inputs, &config))
            .await?;
        drop(inputs);

        self.transition(SessionState::Encoding { progress: None });

        if guard.cancel_requested {
            // Canceled before the encode started; nothing is running yet
            self.status("Canceling...");
            staged.cleanup(self.engine.as_mut()).await;
            return Err(ConversionError::Canceled);
        }

        let args = self
            .commands
            .build_encode_command(&staged.image_name, &staged.audio_name, &config);

        match self.encode(&args, duration, &mut guard).await {
            EncodeOutcome::Finished(Ok(())) => {
                let output = self.engine.read_file(OUTPUT_NAME).await;
                staged.cleanup(self.engine.as_mut()).await;
                let bytes = output.map_err(ConversionError::engine)?;
                if bytes.is_empty() {
                    return Err(ConversionError::Engine("encoder produced an empty file".to_string()));
                }
                self.finish_progress(duration);
                Ok(OutputArtifact { name: output_name, bytes })
            }
            EncodeOutcome::Finished(Err(e)) => {
                staged.cleanup(self.engine.as_mut()).await;
                Err(ConversionError::engine(e))
            }
            EncodeOutcome::Canceled => {
                self.status("Canceling...");
                staged.cleanup(self.engine.as_mut()).await;
                self.replace_engine().await;
                Err(ConversionError::Canceled)
            }
        }
    }

    /// Run the encode, feeding its log lines through the progress monitor
    /// and watching for user commands until it finishes or is canceled
    async fn encode(
        &mut self,
        args: &[String],
        total_duration_secs: f64,
        guard: &mut CommandGuard<'_>,
    ) -> EncodeOutcome {
        let (log_tx, mut log_rx) = mpsc::unbounded_channel::<String>();
        self.engine.set_logger(Some(log_tx));

        let session_id = self.session.id();
        let mut progress: Option<ProgressSample> = None;

        let outcome = {
            let run = self.engine.run(args);
            tokio::pin!(run);

            loop {
                tokio::select! {
                    biased;
                    Some(line) = log_rx.recv() => {
                        if let Some(sample) = ProgressMonitor::ingest(&line, total_duration_secs, progress.as_ref()) {
                            publish_progress(&self.events, session_id, &sample);
                            self.session = self.session.with_state(SessionState::Encoding { progress: Some(sample) });
                            progress = Some(sample);
                        }
                    }
                    command = guard.commands.recv(), if guard.open => {
                        guard.handle(command);
                        if guard.cancel_requested {
                            break EncodeOutcome::Canceled;
                        }
                    }
                    result = &mut run => break EncodeOutcome::Finished(result),
                }
            }
        };

        self.engine.set_logger(None);
        if let EncodeOutcome::Finished(_) = &outcome {
            // Lines the engine produced right before exiting
            while let Ok(line) = log_rx.try_recv() {
                if let Some(sample) = ProgressMonitor::ingest(&line, total_duration_secs, progress.as_ref()) {
                    publish_progress(&self.events, session_id, &sample);
                    progress = Some(sample);
                }
            }
            if progress.is_some() {
                self.transition(SessionState::Encoding { progress });
            }
        }

        outcome
    }

    /// Pin the bar to 100% once the encoder has finished successfully
    fn finish_progress(&mut self, total_duration_secs: f64) {
        let sample = ProgressSample {
            elapsed_secs: total_duration_secs,
            speed: None,
            percent: 100.0,
            eta_secs: Some(0.0),
        };
        publish_progress(&self.events, self.session.id(), &sample);
        self.transition(SessionState::Encoding { progress: Some(sample) });
    }

    /// Tear down the engine instance and start over with a fresh one.
    /// The engine has no finer-grained abort.
    async fn replace_engine(&mut self) {
        if let Err(e) = self.engine.exit().await {
            warn!("Engine teardown failed: {:#}", e);
        }
        self.engine = self.engines.create();
        info!("Engine instance replaced");
    }

    async fn cancel(&mut self) {
        // Outside of an encode there is nothing running to cancel, unless a
        // previous start was abandoned mid-encode
        if self.session.kind() != StateKind::Encoding {
            debug!("Cancel ignored: no active encode");
            return;
        }
        self.status("Canceling...");
        self.replace_engine().await;
        self.transition(SessionState::Canceled);
        self.status("Canceled.");
    }

    async fn save(&mut self) {
        let SessionState::Completed(artifact) = self.session.state() else {
            debug!("Save ignored: no video to save");
            return;
        };

        match self.sink.save(&artifact.name, &artifact.bytes).await {
            Ok(path) => {
                let session_id = self.session.id();
                info!("Session {} saved to {}", session_id, path.display());
                self.emit(SessionEvent::Saved { session_id, path });
                self.transition(SessionState::Idle);
            }
            Err(e) => {
                let err = ConversionError::SaveFailed(format!("{:#}", e));
                warn!("{}", err);
                self.emit(SessionEvent::Failed {
                    session_id: self.session.id(),
                    kind: err.kind(),
                    message: err.to_string(),
                });
            }
        }
    }

    async fn reset(&mut self) {
        if self.session.kind().is_active() {
            // Only reachable when a start was abandoned midway
            warn!("Resetting session {} while {:?}", self.session.id(), self.session.kind());
            self.replace_engine().await;
        }
        self.session = Session::new();
        self.emit(SessionEvent::State {
            session_id: self.session.id(),
            state: StateKind::Idle,
        });
    }
}

fn publish_progress(events: &mpsc::UnboundedSender<SessionEvent>, session_id: Uuid, sample: &ProgressSample) {
    let _ = events.send(SessionEvent::Progress {
        session_id,
        percent: sample.display_percent(),
        eta_secs: sample.eta_secs,
    });
    let _ = events.send(SessionEvent::Status {
        message: sample.status_line(),
    });
}

//! Tuning session state machine
//!
//! One session per tuned channel view. All session state lives inside a
//! single dispatch task; commands from the host, worker results, timer
//! fires, and player events all arrive as messages on that task, so no
//! locking is needed. Program lookups run on the blocking pool and post
//! back; every posted result carries the tune epoch (and player generation)
//! it was issued under, and stale results are discarded rather than applied.
//!
//! The content-blocking invariant is owned here: whenever the current
//! program's rating is blocked by policy and not explicitly unblocked by the
//! viewer, the active player is released before the blocked notice goes out,
//! so no frame of blocked content can reach the surface.

use crate::{
    epg::{GuideSync, ParentalPolicy, Program, ProgramLookup},
    error::Result,
    player::{PlayerController, PlayerEvent},
    renderer::RendererEvent,
    source::{BuiltSource, RendererBinding, SourceBuilder},
    types::{
        ContentRating, Cue, PlayerState, SessionId, Surface, Track, TrackKind, TunerConfig,
        VideoUnavailableReason,
    },
};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// External collaborators injected by the hosting layer
#[derive(Clone)]
pub struct Collaborators {
    pub lookup: Arc<dyn ProgramLookup>,
    pub guide_sync: Arc<dyn GuideSync>,
    pub policy: Arc<dyn ParentalPolicy>,
}

/// Notifications produced for the hosting framework
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    VideoAvailable,
    VideoUnavailable(VideoUnavailableReason),
    ContentBlocked(ContentRating),
    ContentAllowed,
    TracksChanged(Vec<Track>),
    TrackSelected {
        kind: TrackKind,
        id: Option<String>,
    },
    /// Timed-text cues for the host's overlay widget
    Cues(Vec<Cue>),
}

/// Coarse session state derived for host queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No channel tuned
    Idle,
    /// Program lookup in flight, possibly retrying
    Resolving,
    Playing,
    /// Content rating blocked; no player exists
    Blocked,
}

/// Snapshot answered by a status query
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub has_player: bool,
    pub player_state: Option<PlayerState>,
    pub last_blocked: Option<ContentRating>,
}

/// Integration point for the decode collaborator: command receivers for the
/// bound renderers plus the sender their events come back on.
#[derive(Debug)]
pub struct PipelineWiring {
    pub bindings: Vec<RendererBinding>,
    pub events: mpsc::UnboundedSender<(TrackKind, RendererEvent)>,
}

enum SessionCommand {
    Tune(Url),
    SetSurface(Option<Surface>),
    SetVolume(f32),
    SelectTrack {
        kind: TrackKind,
        id: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    SetCaptionEnabled(bool),
    UnblockContent(Option<ContentRating>),
    CheckContentBlock,
    Status(oneshot::Sender<SessionStatus>),
    TakePipeline(oneshot::Sender<Option<PipelineWiring>>),
    Release,
}

/// Messages posted back onto the dispatch task from workers, timers, and the
/// active player's channels
enum Worker {
    LookupResult {
        epoch: u64,
        program: Option<Program>,
    },
    Retry {
        epoch: u64,
    },
    ProgramEnded {
        epoch: u64,
    },
    SourceReady {
        generation: u64,
        result: Result<BuiltSource>,
    },
    Player {
        generation: u64,
        event: PlayerEvent,
    },
    Renderer {
        generation: u64,
        kind: TrackKind,
        event: RendererEvent,
    },
}

enum Input {
    Command(Option<SessionCommand>),
    Worker(Worker),
}

/// Command surface of a running session. The hosting layer holds one handle
/// per live session and calls `check_content_block` on each when the
/// blocked-ratings policy changes. Dropping the handle releases the session.
pub struct SessionHandle {
    id: SessionId,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    fn send(&self, command: SessionCommand) {
        let _ = self.commands.send(command);
    }

    /// Tune to a channel. Cancels pending work for any previous tune.
    pub fn tune(&self, channel: Url) {
        self.send(SessionCommand::Tune(channel));
    }

    pub fn set_surface(&self, surface: Option<Surface>) {
        self.send(SessionCommand::SetSurface(surface));
    }

    pub fn set_volume(&self, volume: f32) {
        self.send(SessionCommand::SetVolume(volume));
    }

    /// Select or deselect a track. Subtitle selection requires captions to
    /// be enabled.
    pub async fn select_track(&self, kind: TrackKind, id: Option<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::SelectTrack { kind, id, reply });
        rx.await.unwrap_or(false)
    }

    pub fn set_caption_enabled(&self, enabled: bool) {
        self.send(SessionCommand::SetCaptionEnabled(enabled));
    }

    /// Viewer request to unblock content. Ignored unless `rating` is `None`
    /// or matches the currently blocked rating.
    pub fn unblock_content(&self, rating: Option<ContentRating>) {
        self.send(SessionCommand::UnblockContent(rating));
    }

    /// Re-evaluate content blocking against current policy. The hosting
    /// layer calls this on every live session when policy changes.
    pub fn check_content_block(&self) {
        self.send(SessionCommand::CheckContentBlock);
    }

    /// Snapshot of the session's derived state. `None` once released.
    pub async fn status(&self) -> Option<SessionStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Status(reply));
        rx.await.ok()
    }

    /// Hand the current player's renderer wiring to the decode collaborator.
    /// Meaningful once per prepared player; `None` when no player exists.
    pub async fn take_pipeline(&self) -> Option<PipelineWiring> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::TakePipeline(reply));
        rx.await.ok().flatten()
    }

    /// End the viewing session. Terminal; all pending work is canceled.
    pub fn release(&self) {
        self.send(SessionCommand::Release);
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Per-tune session state machine. Constructed via [`TunerSession::spawn`];
/// lives on its own dispatch task until released.
pub struct TunerSession {
    id: SessionId,
    input_id: String,
    config: TunerConfig,
    collab: Collaborators,
    source_builder: SourceBuilder,
    notices: mpsc::UnboundedSender<Notice>,
    worker_tx: mpsc::UnboundedSender<Worker>,

    channel: Option<Url>,
    /// Bumped on every tune and on release; results tagged with an older
    /// epoch are stale and dropped.
    epoch: u64,
    /// Bumped whenever the active player changes; player-scoped messages
    /// tagged with an older generation are stale and dropped.
    generation: u64,
    program: Option<Program>,
    current_rating: Option<ContentRating>,
    last_blocked: Option<ContentRating>,
    unblocked: HashSet<ContentRating>,
    selected_subtitle: Option<String>,
    caption_enabled: bool,
    surface: Option<Surface>,
    volume: f32,
    guide_sync_requested: bool,
    first_frame_drawn: bool,

    player: Option<PlayerController>,
    lookup_task: Option<JoinHandle<()>>,
    end_task: Option<JoinHandle<()>>,
}

impl TunerSession {
    /// Spawn a session onto its dispatch task. Returns the command handle
    /// and the host's notice stream.
    pub fn spawn(
        input_id: impl Into<String>,
        collaborators: Collaborators,
        config: TunerConfig,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<Notice>) {
        let builder = SourceBuilder::new(
            config.user_agent(),
            Duration::from_millis(config.request_timeout_ms),
        );
        Self::spawn_with_builder(input_id, collaborators, config, builder)
    }

    /// Spawn with an explicit source builder (tests, alternative manifest
    /// transports)
    pub fn spawn_with_builder(
        input_id: impl Into<String>,
        collaborators: Collaborators,
        config: TunerConfig,
        source_builder: SourceBuilder,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<Notice>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();

        let session = TunerSession {
            id: SessionId::new(),
            input_id: input_id.into(),
            config,
            collab: collaborators,
            source_builder,
            notices: notice_tx,
            worker_tx,
            channel: None,
            epoch: 0,
            generation: 0,
            program: None,
            current_rating: None,
            last_blocked: None,
            unblocked: HashSet::new(),
            selected_subtitle: None,
            caption_enabled: false,
            surface: None,
            volume: 1.0,
            guide_sync_requested: false,
            first_frame_drawn: false,
            player: None,
            lookup_task: None,
            end_task: None,
        };
        let id = session.id;
        info!(session = %id, "Session created");
        tokio::spawn(session.run(command_rx, worker_rx));

        (
            SessionHandle {
                id,
                commands: command_tx,
            },
            notice_rx,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut worker: mpsc::UnboundedReceiver<Worker>,
    ) {
        loop {
            let input = tokio::select! {
                command = commands.recv() => Input::Command(command),
                Some(work) = worker.recv() => Input::Worker(work),
            };
            match input {
                Input::Command(None) | Input::Command(Some(SessionCommand::Release)) => {
                    self.shutdown();
                    break;
                }
                Input::Command(Some(command)) => self.handle_command(command),
                Input::Worker(work) => self.handle_worker(work),
            }
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Tune(channel) => self.tune(channel),
            SessionCommand::SetSurface(surface) => {
                self.surface = surface;
                if let Some(player) = &mut self.player {
                    player.set_surface(surface);
                }
            }
            SessionCommand::SetVolume(volume) => {
                self.volume = volume;
                if let Some(player) = &mut self.player {
                    player.set_volume(volume);
                }
            }
            SessionCommand::SelectTrack { kind, id, reply } => {
                let selected = self.select_track(kind, id);
                let _ = reply.send(selected);
            }
            SessionCommand::SetCaptionEnabled(enabled) => self.set_caption_enabled(enabled),
            SessionCommand::UnblockContent(rating) => self.unblock(rating),
            SessionCommand::CheckContentBlock => self.check_content_block(),
            SessionCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            SessionCommand::TakePipeline(reply) => {
                let wiring = self.player.as_mut().map(|player| PipelineWiring {
                    bindings: player.take_bindings(),
                    events: player.event_sink(),
                });
                let _ = reply.send(wiring);
            }
            SessionCommand::Release => unreachable!("handled by the dispatch loop"),
        }
    }

    fn handle_worker(&mut self, work: Worker) {
        match work {
            Worker::LookupResult { epoch, program } => {
                if epoch != self.epoch {
                    debug!("Discarding stale program lookup result");
                    return;
                }
                match program {
                    Some(program) => {
                        self.cancel_lookup();
                        self.play_program(program);
                    }
                    None => {
                        warn!(
                            channel = ?self.channel.as_ref().map(Url::as_str),
                            retry_in_ms = self.config.lookup_retry_delay_ms,
                            "No current program; retrying"
                        );
                        self.schedule_retry();
                        if !self.guide_sync_requested {
                            self.collab.guide_sync.request_sync(&self.input_id, true);
                            self.guide_sync_requested = true;
                        }
                    }
                }
            }
            Worker::Retry { epoch } => {
                if epoch == self.epoch {
                    if let Some(channel) = self.channel.clone() {
                        self.spawn_lookup(channel);
                    }
                }
            }
            Worker::ProgramEnded { epoch } => {
                if epoch == self.epoch {
                    debug!("Program ended; re-resolving the current program");
                    self.start_resolve();
                }
            }
            Worker::SourceReady { generation, result } => {
                if generation != self.generation {
                    debug!("Discarding source build for a released player");
                    return;
                }
                if let Some(player) = &mut self.player {
                    match result {
                        Ok(built) => player.complete_prepare(built),
                        Err(e) => player.fail_prepare(e),
                    }
                }
            }
            Worker::Player { generation, event } => {
                if generation == self.generation {
                    self.handle_player_event(event);
                }
            }
            Worker::Renderer {
                generation,
                kind,
                event,
            } => {
                if generation == self.generation {
                    if let Some(player) = &mut self.player {
                        player.handle_renderer_event(kind, event);
                    }
                }
            }
        }
    }

    fn tune(&mut self, channel: Url) {
        info!(session = %self.id, channel = %channel, "Tune");
        self.epoch += 1;
        self.cancel_lookup();
        self.cancel_end_timer();
        self.unblocked.clear();
        self.guide_sync_requested = false;
        self.notify(Notice::VideoUnavailable(VideoUnavailableReason::Tuning));
        self.channel = Some(channel);
        self.start_resolve();
    }

    fn start_resolve(&mut self) {
        let Some(channel) = self.channel.clone() else {
            return;
        };
        self.spawn_lookup(channel);
    }

    /// Query the program guide off the dispatch task. The result comes back
    /// as a worker message tagged with the current epoch.
    fn spawn_lookup(&mut self, channel: Url) {
        self.cancel_lookup();
        let epoch = self.epoch;
        let lookup = Arc::clone(&self.collab.lookup);
        let tx = self.worker_tx.clone();
        self.lookup_task = Some(tokio::spawn(async move {
            let program = tokio::task::spawn_blocking(move || lookup.current_program(&channel))
                .await
                .ok()
                .flatten();
            let _ = tx.send(Worker::LookupResult { epoch, program });
        }));
    }

    fn schedule_retry(&mut self) {
        self.cancel_lookup();
        let epoch = self.epoch;
        let delay = self.config.lookup_retry_delay();
        let tx = self.worker_tx.clone();
        self.lookup_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Worker::Retry { epoch });
        }));
    }

    /// One-shot re-resolve shortly after the program's announced end, so
    /// program-to-program transitions happen without a re-tune.
    fn schedule_program_end(&mut self, program: &Program) {
        self.cancel_end_timer();
        let now = Utc::now().timestamp_millis();
        let until_end = (program.end_time_utc_millis() - now).max(0) as u64;
        let delay = Duration::from_millis(until_end + self.config.program_end_margin_ms);
        let epoch = self.epoch;
        let tx = self.worker_tx.clone();
        self.end_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Worker::ProgramEnded { epoch });
        }));
    }

    fn cancel_lookup(&mut self) {
        if let Some(task) = self.lookup_task.take() {
            task.abort();
        }
    }

    fn cancel_end_timer(&mut self) {
        if let Some(task) = self.end_task.take() {
            task.abort();
        }
    }

    /// Start playback of a resolved program: fresh player, async source
    /// build posted back onto the dispatch task, then the block check.
    fn play_program(&mut self, program: Program) {
        self.release_player();
        self.generation += 1;
        let generation = self.generation;

        self.current_rating = program.primary_rating().cloned();
        self.first_frame_drawn = false;
        info!(
            session = %self.id,
            title = ?program.title,
            rating = ?self.current_rating,
            "Playing program"
        );

        let mut player = PlayerController::new(self.source_builder.clone(), &self.config);

        let mut player_rx = player.subscribe();
        let tx = self.worker_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = player_rx.recv().await {
                if tx.send(Worker::Player { generation, event }).is_err() {
                    break;
                }
            }
        });
        if let Some(mut renderer_rx) = player.take_renderer_events() {
            let tx = self.worker_tx.clone();
            tokio::spawn(async move {
                while let Some((kind, event)) = renderer_rx.recv().await {
                    let work = Worker::Renderer {
                        generation,
                        kind,
                        event,
                    };
                    if tx.send(work).is_err() {
                        break;
                    }
                }
            });
        }

        match program.video() {
            Ok(video) => {
                let builder = self.source_builder.clone();
                let user_agent = self.config.user_agent();
                let tx = self.worker_tx.clone();
                tokio::spawn(async move {
                    let result = builder
                        .build(&video.locator, video.source_kind, &user_agent)
                        .await;
                    let _ = tx.send(Worker::SourceReady { generation, result });
                });
            }
            Err(e) => player.fail_prepare(e),
        }

        player.set_surface(self.surface);
        player.set_volume(self.volume);
        player.set_play_when_ready(true);
        self.player = Some(player);
        self.program = Some(program.clone());

        self.check_content_block();
        self.schedule_program_end(&program);
    }

    fn release_player(&mut self) {
        if let Some(mut player) = self.player.take() {
            debug!(session = %self.id, "Releasing player");
            player.set_surface(None);
            player.stop();
            player.release();
            // Invalidate in-flight builds and queued events for this player.
            self.generation += 1;
        }
    }

    /// Re-evaluate the blocking decision. Runs after every resolve success
    /// and on every external policy change.
    fn check_content_block(&mut self) {
        let blocked_rating = self
            .current_rating
            .as_ref()
            .filter(|rating| {
                self.collab.policy.parental_controls_enabled()
                    && self.collab.policy.is_rating_blocked(rating)
                    && !self.unblocked.contains(*rating)
            })
            .cloned();

        match blocked_rating {
            None => {
                // Rating is fine (or changed); unblock explicitly so playback
                // resumes if the player was torn down.
                self.unblock(None);
            }
            Some(rating) => {
                info!(session = %self.id, rating = %rating, "Blocking content");
                self.last_blocked = Some(rating.clone());
                if self.player.is_some() {
                    // Not one frame of blocked content may reach the surface.
                    self.release_player();
                }
                self.notify(Notice::ContentBlocked(rating));
                debug_assert!(self.player.is_none());
            }
        }
    }

    /// Apply an unblock request. Only legitimate requests are honored:
    /// `None` (internal resume) or the exact rating currently blocked.
    fn unblock(&mut self, rating: Option<ContentRating>) {
        let legitimate = match (&rating, &self.last_blocked) {
            (None, _) => true,
            (Some(requested), Some(blocked)) => requested == blocked,
            (Some(_), None) => false,
        };
        if !legitimate {
            debug!(
                session = %self.id,
                requested = ?rating,
                blocked = ?self.last_blocked,
                "Ignoring unblock for a rating that is not the current block"
            );
            return;
        }

        self.last_blocked = None;
        if let Some(rating) = rating {
            self.unblocked.insert(rating);
        }
        if self.player.is_none() {
            if let Some(program) = self.program.clone() {
                self.play_program(program);
            }
        }
        self.notify(Notice::ContentAllowed);
    }

    fn select_track(&mut self, kind: TrackKind, id: Option<String>) -> bool {
        if self.player.is_none() {
            return false;
        }
        if kind == TrackKind::Subtitle {
            if !self.caption_enabled && id.is_some() {
                return false;
            }
            self.selected_subtitle = id.clone();
        }
        let selected = self
            .player
            .as_mut()
            .map(|player| player.select_track(kind, id.as_deref()))
            .unwrap_or(false);
        if selected {
            self.notify(Notice::TrackSelected { kind, id });
        }
        selected
    }

    fn set_caption_enabled(&mut self, enabled: bool) {
        self.caption_enabled = enabled;
        let remembered = self.selected_subtitle.clone();
        if let Some(player) = &mut self.player {
            if enabled {
                if let Some(id) = remembered {
                    player.select_track(TrackKind::Subtitle, Some(&id));
                }
            } else {
                player.select_track(TrackKind::Subtitle, None);
            }
        }
    }

    fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Prepared => {
                self.first_frame_drawn = false;
                if let Some(player) = &self.player {
                    self.notify(Notice::TracksChanged(player.all_tracks()));
                    for kind in TrackKind::ALL {
                        self.notify(Notice::TrackSelected {
                            kind,
                            id: player.selected_track(kind).map(str::to_string),
                        });
                    }
                }
            }
            PlayerEvent::StateChanged {
                play_when_ready,
                state,
            } => {
                if play_when_ready && state == PlayerState::Buffering && self.first_frame_drawn {
                    self.notify(Notice::VideoUnavailable(VideoUnavailableReason::Buffering));
                } else if play_when_ready && state == PlayerState::Ready {
                    self.notify(Notice::VideoAvailable);
                }
            }
            PlayerEvent::FrameDrawn => {
                self.first_frame_drawn = true;
                self.notify(Notice::VideoAvailable);
            }
            PlayerEvent::Error(error) => {
                // Preparation is not retried; the host owns recovery policy.
                warn!(
                    session = %self.id,
                    error = %error,
                    code = error.error_code(),
                    "Player error"
                );
            }
            PlayerEvent::Cues(cues) => {
                self.notify(Notice::Cues(cues));
            }
        }
    }

    fn status(&self) -> SessionStatus {
        let state = if self.channel.is_none() {
            SessionState::Idle
        } else if self.last_blocked.is_some() {
            SessionState::Blocked
        } else if self.player.is_some() {
            SessionState::Playing
        } else {
            SessionState::Resolving
        };
        SessionStatus {
            state,
            has_player: self.player.is_some(),
            player_state: self.player.as_ref().map(PlayerController::state),
            last_blocked: self.last_blocked.clone(),
        }
    }

    fn shutdown(&mut self) {
        info!(session = %self.id, "Releasing session");
        self.cancel_lookup();
        self.cancel_end_timer();
        self.release_player();
        self.channel = None;
        self.program = None;
        self.epoch += 1;
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }
}

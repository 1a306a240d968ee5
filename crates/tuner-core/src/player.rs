//! Player controller - one instance per playing program
//!
//! Owns the renderer slots produced by source construction, the playback
//! state machine, and the per-instance track registry. Volume, surface, and
//! seek requests are always legal; whatever cannot be applied yet is
//! buffered and replayed once preparation completes or readiness is reached.

use crate::{
    error::Error,
    renderer::{RendererCommand, RendererEvent, RendererSlots, RendererState},
    source::{BuiltSource, MediaSource, RendererBinding, SourceBuilder},
    tracks::TrackRegistry,
    types::{Cue, PlayerState, SourceKind, Surface, Track, TrackKind, TunerConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Events fanned out to player listeners, in subscription order
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Renderers are constructed and the underlying player is preparing
    Prepared,
    StateChanged {
        play_when_ready: bool,
        state: PlayerState,
    },
    /// Asynchronous failure: source construction, decoder init, crypto
    Error(Arc<Error>),
    /// First frame of this source reached the surface
    FrameDrawn,
    /// Timed-text cues for the host's overlay widget
    Cues(Vec<Cue>),
}

/// Controller for one underlying multi-renderer player instance. Not reused
/// across programs; the session constructs a fresh one per `play_program`.
pub struct PlayerController {
    builder: SourceBuilder,
    user_agent: String,
    state: PlayerState,
    play_when_ready: bool,
    source: Option<MediaSource>,
    slots: Option<RendererSlots>,
    bindings: Vec<RendererBinding>,
    tracks: TrackRegistry,
    volume: f32,
    surface: Option<Surface>,
    position: Duration,
    pending_seek: Option<Duration>,
    subscribers: Vec<mpsc::UnboundedSender<PlayerEvent>>,
    renderer_tx: mpsc::UnboundedSender<(TrackKind, RendererEvent)>,
    renderer_rx: Option<mpsc::UnboundedReceiver<(TrackKind, RendererEvent)>>,
}

impl PlayerController {
    pub fn new(builder: SourceBuilder, config: &TunerConfig) -> Self {
        let (renderer_tx, renderer_rx) = mpsc::unbounded_channel();
        Self {
            builder,
            user_agent: config.user_agent(),
            state: PlayerState::Idle,
            play_when_ready: false,
            source: None,
            slots: None,
            bindings: Vec::new(),
            tracks: TrackRegistry::new(),
            volume: 1.0,
            surface: None,
            position: Duration::ZERO,
            pending_seek: None,
            subscribers: Vec::new(),
            renderer_tx,
            renderer_rx: Some(renderer_rx),
        }
    }

    /// Register a listener. Events are delivered in subscription order; a
    /// dropped receiver never breaks delivery to the others.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PlayerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Sender the decode collaborator posts renderer events into
    pub fn event_sink(&self) -> mpsc::UnboundedSender<(TrackKind, RendererEvent)> {
        self.renderer_tx.clone()
    }

    /// Receiver of renderer events, taken by whoever drives this controller
    /// (the session's dispatch loop)
    pub fn take_renderer_events(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<(TrackKind, RendererEvent)>> {
        self.renderer_rx.take()
    }

    /// Command receivers for the decode collaborator, one per bound renderer
    pub fn take_bindings(&mut self) -> Vec<RendererBinding> {
        std::mem::take(&mut self.bindings)
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn play_when_ready(&self) -> bool {
        self.play_when_ready
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    /// The constructed media source, when prepared
    pub fn source(&self) -> Option<&MediaSource> {
        self.source.as_ref()
    }

    /// Construct the source and renderer set for `locator`. On success the
    /// controller transitions to Preparing and emits `Prepared`; on failure
    /// it emits `Error` and stays Idle with no renderers.
    #[instrument(skip(self))]
    pub async fn prepare(&mut self, locator: &Url, kind: SourceKind) {
        info!(locator = %locator, kind = %kind, "Preparing player");
        let built = self.builder.build(locator, kind, &self.user_agent).await;
        match built {
            Ok(built) => self.complete_prepare(built),
            Err(e) => self.fail_prepare(e),
        }
    }

    /// Install a finished source build. Split from `prepare` so the session
    /// can run the build off its dispatch loop and post the result back.
    pub fn complete_prepare(&mut self, built: BuiltSource) {
        self.tracks.populate(built.tracks);
        if let Some(id) = &built.default_audio {
            self.tracks.select(TrackKind::Audio, Some(id));
        }

        let slots = built.slots;
        // Replay whatever was issued before preparation finished.
        slots.audio.send(RendererCommand::SetVolume(self.volume));
        slots.video.send(RendererCommand::SetSurface(self.surface));
        // Subtitle output is opt-in.
        slots.text.send(RendererCommand::Enable(false));

        self.source = Some(built.source);
        self.bindings = built.bindings;
        self.slots = Some(slots);
        self.set_state(PlayerState::Preparing);
        self.emit(PlayerEvent::Prepared);
    }

    /// Record a failed source build. No renderers exist; the controller
    /// remains Idle and the failure travels the event channel.
    pub fn fail_prepare(&mut self, error: Error) {
        warn!(error = %error, code = error.error_code(), "Source construction failed");
        self.emit(PlayerEvent::Error(Arc::new(error)));
    }

    /// Attach or detach the display surface. Always legal; buffered, and
    /// forwarded immediately when a video renderer exists.
    pub fn set_surface(&mut self, surface: Option<Surface>) {
        self.surface = surface;
        if let Some(slots) = &self.slots {
            slots.video.send(RendererCommand::SetSurface(surface));
        }
    }

    /// Set the audio volume. Always legal; buffered, and forwarded when an
    /// audio renderer exists.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(slots) = &self.slots {
            slots.audio.send(RendererCommand::SetVolume(self.volume));
        }
    }

    pub fn set_play_when_ready(&mut self, play_when_ready: bool) {
        if self.play_when_ready == play_when_ready {
            return;
        }
        self.play_when_ready = play_when_ready;
        self.emit(PlayerEvent::StateChanged {
            play_when_ready,
            state: self.state,
        });
    }

    /// Enable or disable a renderer's output. `None` disables; an id enables,
    /// and an id the source does not know is accepted silently (the renderer
    /// keeps its current stream).
    pub fn select_track(&mut self, kind: TrackKind, id: Option<&str>) -> bool {
        if let Some(slots) = &self.slots {
            slots.get(kind).send(RendererCommand::Enable(id.is_some()));
        }
        let _ = self.tracks.select(kind, id);
        true
    }

    /// Raw host-framework boundary: an out-of-range track type is an
    /// observable `false`, not a panic.
    pub fn select_track_raw(&mut self, raw_kind: i32, id: Option<&str>) -> bool {
        match TrackKind::from_raw(raw_kind) {
            Some(kind) => self.select_track(kind, id),
            None => false,
        }
    }

    /// Tracks of one kind, construction order. Empty when the kind has none.
    pub fn tracks(&self, kind: TrackKind) -> &[Track] {
        self.tracks.list(kind)
    }

    /// All tracks across kinds, audio first (host notification order)
    pub fn all_tracks(&self) -> Vec<Track> {
        self.tracks.all()
    }

    pub fn selected_track(&self, kind: TrackKind) -> Option<&str> {
        self.tracks.selected(kind)
    }

    /// Seek. Before Ready the position is buffered and applied exactly once
    /// upon reaching Ready; at Ready it applies immediately.
    pub fn seek_to(&mut self, position: Duration) {
        if self.state == PlayerState::Ready {
            self.position = position;
        } else {
            debug!(position_ms = position.as_millis() as u64, "Buffering seek until ready");
            self.pending_seek = Some(position);
        }
    }

    /// Halt playback without tearing down renderers
    pub fn stop(&mut self) {
        if self.state != PlayerState::Idle {
            self.state = PlayerState::Idle;
            self.emit(PlayerEvent::StateChanged {
                play_when_ready: self.play_when_ready,
                state: self.state,
            });
        }
    }

    /// Tear down all renderers and the underlying player. Idempotent; safe
    /// on an already-idle instance.
    pub fn release(&mut self) {
        self.slots = None;
        self.bindings.clear();
        self.source = None;
        self.tracks.clear();
        self.pending_seek = None;
        self.position = Duration::ZERO;
        self.state = PlayerState::Idle;
    }

    /// Translate one renderer event into controller state and listener
    /// events. Invalid state signals are logged and absorbed, never fatal.
    pub fn handle_renderer_event(&mut self, kind: TrackKind, event: RendererEvent) {
        match event {
            RendererEvent::StateChanged(renderer_state) => {
                let target = match renderer_state {
                    RendererState::Buffering => PlayerState::Buffering,
                    RendererState::Ready => PlayerState::Ready,
                    RendererState::Ended => PlayerState::Ended,
                };
                if self.state == target {
                    return;
                }
                if !self.set_state(target) {
                    return;
                }
                if target == PlayerState::Ready {
                    if let Some(position) = self.pending_seek.take() {
                        debug!(
                            position_ms = position.as_millis() as u64,
                            "Applying deferred seek"
                        );
                        self.position = position;
                    }
                }
                self.emit(PlayerEvent::StateChanged {
                    play_when_ready: self.play_when_ready,
                    state: self.state,
                });
            }
            RendererEvent::Error(error) => {
                warn!(kind = %kind, error = %error, code = error.error_code(), "Renderer error");
                if self.state != PlayerState::Idle && self.state != PlayerState::Error {
                    self.state = PlayerState::Error;
                }
                self.emit(PlayerEvent::Error(Arc::new(error)));
            }
            RendererEvent::FrameDrawn => {
                self.emit(PlayerEvent::FrameDrawn);
            }
            RendererEvent::Cues(cues) => {
                self.emit(PlayerEvent::Cues(cues));
            }
        }
    }

    fn set_state(&mut self, target: PlayerState) -> bool {
        if !self.state.can_transition_to(target) {
            warn!(from = %self.state, to = %target, "Ignoring invalid state transition");
            return false;
        }
        debug!(from = %self.state, to = %target, "State transition");
        self.state = target;
        true
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

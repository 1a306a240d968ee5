//! Renderer command/event protocol
//!
//! The decode-and-present units (video, audio, timed text) live outside this
//! crate. The controller talks to them through a bounded command enum and
//! they report back through a bounded event enum, both carried over channels
//! so either side may live on any thread.

use crate::{
    error::Error,
    types::{Cue, Surface, TrackKind},
};
use tokio::sync::mpsc;

/// Controller -> renderer messages. Delivered out-of-band; a renderer applies
/// them at its next convenient point rather than synchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererCommand {
    /// Audio volume, 0.0..=1.0
    SetVolume(f32),
    /// Attach or detach the display surface. `None` detaches rendering
    /// without destroying the renderer.
    SetSurface(Option<Surface>),
    /// Enable or disable this renderer's output
    Enable(bool),
}

/// Aggregate playback readiness reported by the decode pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Buffering,
    Ready,
    Ended,
}

/// Renderer -> controller messages
#[derive(Debug)]
pub enum RendererEvent {
    StateChanged(RendererState),
    Error(Error),
    /// First frame of the current source reached the surface
    FrameDrawn,
    /// Timed-text cues decoded from the stream
    Cues(Vec<Cue>),
}

/// Sending half of a renderer's command channel. A handle is fixed into its
/// player slot at construction time and lives until the player is released.
#[derive(Debug, Clone)]
pub struct RendererHandle {
    kind: TrackKind,
    commands: Option<mpsc::UnboundedSender<RendererCommand>>,
}

impl RendererHandle {
    /// Create a handle bound to a real renderer. Returns the handle and the
    /// command receiver to hand to the decode collaborator.
    pub fn bound(kind: TrackKind) -> (Self, mpsc::UnboundedReceiver<RendererCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                kind,
                commands: Some(tx),
            },
            rx,
        )
    }

    /// No-op placeholder renderer. Accepts and drops every command.
    pub fn noop(kind: TrackKind) -> Self {
        Self {
            kind,
            commands: None,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_noop(&self) -> bool {
        self.commands.is_none()
    }

    /// Best-effort send. Commands to a placeholder, or to a renderer whose
    /// decode side has gone away, are dropped.
    pub fn send(&self, command: RendererCommand) {
        if let Some(tx) = &self.commands {
            let _ = tx.send(command);
        }
    }
}

/// The three renderer slots of one player instance. Fixed at prepare time,
/// never reassigned until release.
#[derive(Debug)]
pub struct RendererSlots {
    pub video: RendererHandle,
    pub audio: RendererHandle,
    pub text: RendererHandle,
}

impl RendererSlots {
    pub fn get(&self, kind: TrackKind) -> &RendererHandle {
        match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
            TrackKind::Subtitle => &self.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_handle_delivers_commands() {
        let (handle, mut rx) = RendererHandle::bound(TrackKind::Audio);
        handle.send(RendererCommand::SetVolume(0.5));
        assert_eq!(rx.try_recv().unwrap(), RendererCommand::SetVolume(0.5));
    }

    #[test]
    fn test_noop_handle_drops_commands() {
        let handle = RendererHandle::noop(TrackKind::Subtitle);
        assert!(handle.is_noop());
        // Must not panic or block.
        handle.send(RendererCommand::Enable(true));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (handle, rx) = RendererHandle::bound(TrackKind::Video);
        drop(rx);
        handle.send(RendererCommand::SetSurface(None));
    }
}

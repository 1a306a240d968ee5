//! Tuner Core - TV input pipeline
//!
//! This crate provides the core of a television input pipeline:
//! - Per-channel tuning sessions with program-guide resolution and retry
//! - Source construction for progressive, HLS, DASH, and multicast-TS streams
//! - A player controller with buffered volume/surface/seek and track selection
//! - Parental-control content blocking with a zero-blocked-frames guarantee
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Tuner Core                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │    Source    │  │    Track     │  │   Renderer   │          │
//! │  │   Builder    │  │   Registry   │  │   Protocol   │          │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │   Player    │                              │
//! │                    │ Controller  │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐           │
//! │  │   Program    │  │   Tuning    │  │   Content    │           │
//! │  │    Guide     │  │   Session   │  │   Blocking   │           │
//! │  └──────────────┘  └─────────────┘  └──────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The session is the single owner of all per-tune state. Everything reaches
//! it as a message on one dispatch task: host commands, program-lookup
//! results, timer fires, and renderer events. Decoders, demuxers, the
//! subtitle overlay, and the program-guide store are external collaborators
//! behind the traits in [`epg`] and the channels in [`renderer`].

pub mod epg;
pub mod error;
pub mod player;
pub mod renderer;
pub mod session;
pub mod source;
pub mod tracks;
pub mod types;

pub use epg::{GuideSync, ParentalPolicy, Program, ProgramLookup, VideoInfo};
pub use error::{Error, Result};
pub use player::{PlayerController, PlayerEvent};
pub use renderer::{RendererCommand, RendererEvent, RendererHandle, RendererState};
pub use session::{
    Collaborators, Notice, PipelineWiring, SessionHandle, SessionState, SessionStatus,
    TunerSession,
};
pub use source::{BuiltSource, ManifestFetch, SourceBuilder};
pub use tracks::TrackRegistry;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the pipeline library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Tuner Core initialized");
}

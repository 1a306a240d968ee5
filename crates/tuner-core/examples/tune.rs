//! Tuning session example
//!
//! Spawns a session against in-memory collaborators, tunes a channel, drives
//! the renderer side to readiness, and prints the notices a TV host would
//! receive.
//!
//! Run with: cargo run -p tuner-core --example tune

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tuner_core::{
    Collaborators, ContentRating, GuideSync, Notice, ParentalPolicy, Program, ProgramLookup,
    RendererEvent, RendererState, SourceKind, TrackKind, TunerConfig, TunerSession,
};
use url::Url;

/// Single-channel in-memory guide
struct DemoGuide {
    program: Program,
}

impl ProgramLookup for DemoGuide {
    fn current_program(&self, _channel: &Url) -> Option<Program> {
        Some(self.program.clone())
    }
}

struct NoSync;

impl GuideSync for NoSync {
    fn request_sync(&self, input_id: &str, expedite: bool) {
        println!("guide sync requested: input={input_id} expedite={expedite}");
    }
}

struct DemoPolicy {
    blocked: Mutex<HashSet<ContentRating>>,
}

impl ParentalPolicy for DemoPolicy {
    fn parental_controls_enabled(&self) -> bool {
        true
    }

    fn is_rating_blocked(&self, rating: &ContentRating) -> bool {
        self.blocked.lock().unwrap().contains(rating)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("tuner_core=info")
        .init();
    tuner_core::init();

    println!("Tuner Core - Tuning Session Example");
    println!("==========================================\n");

    let channel = Url::parse("tv://demo/channel/5").unwrap();
    let stream = Url::parse("udp://239.0.0.1:1234").unwrap();
    let rating = ContentRating::new("com.android.tv/US_TV/US_TV_MA");

    let program = Program::new(
        channel.clone(),
        Utc::now(),
        Utc::now() + chrono::Duration::hours(1),
    )
    .with_title("Evening News")
    .with_rating(rating.clone())
    .with_video(SourceKind::MpegTsMulticast, &stream);

    let policy = Arc::new(DemoPolicy {
        blocked: Mutex::new(HashSet::from([rating.clone()])),
    });

    let (session, mut notices) = TunerSession::spawn(
        "com.example.tuner/.DemoInput",
        Collaborators {
            lookup: Arc::new(DemoGuide { program }),
            guide_sync: Arc::new(NoSync),
            policy,
        },
        TunerConfig::default(),
    );

    println!("Tuning {channel} (rating {rating} is blocked)...\n");
    session.tune(channel);

    // The blocked rating keeps the player from existing.
    while let Some(notice) = notices.recv().await {
        println!("notice: {notice:?}");
        if matches!(notice, Notice::ContentBlocked(_)) {
            break;
        }
    }

    println!("\nViewer enters PIN; unblocking {rating}...\n");
    session.unblock_content(Some(rating));

    while let Some(notice) = notices.recv().await {
        println!("notice: {notice:?}");
        if matches!(notice, Notice::TracksChanged(_)) {
            break;
        }
    }

    // Pretend to be the decode pipeline: report readiness.
    if let Some(wiring) = session.take_pipeline().await {
        wiring
            .events
            .send((
                TrackKind::Video,
                RendererEvent::StateChanged(RendererState::Ready),
            ))
            .ok();
    }

    while let Some(notice) = notices.recv().await {
        println!("notice: {notice:?}");
        if notice == Notice::VideoAvailable {
            break;
        }
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    session.release();
    println!("\nSession released.");
}

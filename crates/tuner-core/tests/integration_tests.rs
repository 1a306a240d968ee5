//! Integration tests for Tuner Core
//!
//! Sessions run against scripted collaborators: a program guide that can
//! miss, a recording sync adapter, a mutable parental policy, and a stub
//! manifest fetcher so no network is touched.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

use tuner_core::source::{HlsManifest, ManifestFetch, MpdManifest};
use tuner_core::{
    Collaborators, ContentRating, Error, GuideSync, Notice, ParentalPolicy, Program,
    ProgramLookup, RendererEvent, RendererState, Result, SessionState, SourceBuilder, SourceKind,
    TrackKind, TunerConfig, TunerSession,
};

// =============================================================================
// Scripted collaborators
// =============================================================================

/// Guide that misses a fixed number of times, then serves queued programs
struct ScriptedLookup {
    calls: AtomicUsize,
    misses: AtomicUsize,
    programs: Mutex<VecDeque<Program>>,
    last: Mutex<Option<Program>>,
}

impl ScriptedLookup {
    fn new(misses: usize, programs: Vec<Program>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            misses: AtomicUsize::new(misses),
            programs: Mutex::new(programs.into()),
            last: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProgramLookup for ScriptedLookup {
    fn current_program(&self, _channel: &Url) -> Option<Program> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |m| m.checked_sub(1))
            .is_ok()
        {
            return None;
        }
        let mut queue = self.programs.lock().unwrap();
        match queue.pop_front() {
            Some(program) => {
                *self.last.lock().unwrap() = Some(program.clone());
                Some(program)
            }
            None => self.last.lock().unwrap().clone(),
        }
    }
}

/// Guide keyed by channel, with a configurable per-channel answer delay
struct ChannelLookup {
    entries: HashMap<String, (u64, Program)>,
}

impl ProgramLookup for ChannelLookup {
    fn current_program(&self, channel: &Url) -> Option<Program> {
        let (delay_ms, program) = self.entries.get(channel.as_str())?;
        if *delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(*delay_ms));
        }
        Some(program.clone())
    }
}

struct RecordingSync {
    calls: AtomicUsize,
}

impl RecordingSync {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GuideSync for RecordingSync {
    fn request_sync(&self, _input_id: &str, _expedite: bool) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

struct MutablePolicy {
    enabled: AtomicBool,
    blocked: Mutex<HashSet<ContentRating>>,
}

impl MutablePolicy {
    fn disabled() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(false),
            blocked: Mutex::new(HashSet::new()),
        })
    }

    fn blocking(rating: &ContentRating) -> Arc<Self> {
        let policy = Self::disabled();
        policy.enabled.store(true, Ordering::SeqCst);
        policy.block(rating);
        policy
    }

    fn block(&self, rating: &ContentRating) {
        self.blocked.lock().unwrap().insert(rating.clone());
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }
}

impl ParentalPolicy for MutablePolicy {
    fn parental_controls_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn is_rating_blocked(&self, rating: &ContentRating) -> bool {
        self.blocked.lock().unwrap().contains(rating)
    }
}

/// Manifest fetcher that always succeeds with a minimal live playlist
struct StubFetcher;

#[async_trait]
impl ManifestFetch for StubFetcher {
    async fn fetch_hls(&self, _url: &Url) -> Result<HlsManifest> {
        Ok(HlsManifest {
            is_master: true,
            variant_count: 1,
            is_live: true,
            duration: None,
            audio_tracks: Vec::new(),
        })
    }

    async fn fetch_mpd(&self, _url: &Url) -> Result<MpdManifest> {
        Ok(MpdManifest {
            is_live: true,
            video_representation_count: 1,
            audio_tracks: Vec::new(),
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tuner_core=debug")
        .try_init();
}

fn channel_url(n: u32) -> Url {
    Url::parse(&format!("tv://input/channel/{n}")).unwrap()
}

fn hls_program(channel: &Url, rating: Option<ContentRating>) -> Program {
    let stream = Url::parse("https://example.com/live/master.m3u8").unwrap();
    let mut program = Program::new(
        channel.clone(),
        Utc::now() - chrono::Duration::minutes(5),
        Utc::now() + chrono::Duration::minutes(30),
    )
    .with_title("Current Program")
    .with_video(SourceKind::Hls, &stream);
    if let Some(rating) = rating {
        program = program.with_rating(rating);
    }
    program
}

fn fast_config() -> TunerConfig {
    TunerConfig {
        lookup_retry_delay_ms: 20,
        program_end_margin_ms: 50,
        ..TunerConfig::default()
    }
}

fn spawn_session(
    lookup: Arc<dyn ProgramLookup>,
    sync: Arc<RecordingSync>,
    policy: Arc<MutablePolicy>,
) -> (
    tuner_core::SessionHandle,
    mpsc::UnboundedReceiver<Notice>,
) {
    TunerSession::spawn_with_builder(
        "com.example.tuner/.TunerInput",
        Collaborators {
            lookup,
            guide_sync: sync,
            policy,
        },
        fast_config(),
        SourceBuilder::with_fetcher(Arc::new(StubFetcher)),
    )
}

/// Wait for a notice matching `pred`, asserting nothing seen on the way
/// violates `forbidden`.
async fn wait_for(
    notices: &mut mpsc::UnboundedReceiver<Notice>,
    pred: impl Fn(&Notice) -> bool,
    forbidden: impl Fn(&Notice) -> bool,
) -> Notice {
    timeout(Duration::from_secs(5), async {
        loop {
            let notice = notices.recv().await.expect("notice channel closed");
            assert!(!forbidden(&notice), "forbidden notice observed: {notice:?}");
            if pred(&notice) {
                return notice;
            }
        }
    })
    .await
    .expect("timed out waiting for notice")
}

fn no_forbidden(_: &Notice) -> bool {
    false
}

/// Drain whatever is pending right now
fn drain(notices: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut seen = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        seen.push(notice);
    }
    seen
}

// =============================================================================
// Scenarios
// =============================================================================

// Scenario A: unrated program plays; content blocking never engages.
#[tokio::test]
async fn test_unrated_program_plays_without_blocking() {
    init_tracing();
    let channel = channel_url(5);
    let lookup = ScriptedLookup::new(0, vec![hls_program(&channel, None)]);
    let sync = RecordingSync::new();
    let (handle, mut notices) = spawn_session(lookup, sync, MutablePolicy::disabled());

    handle.tune(channel);

    let blocked = |n: &Notice| matches!(n, Notice::ContentBlocked(_));
    wait_for(
        &mut notices,
        |n| matches!(n, Notice::VideoUnavailable(_)),
        blocked,
    )
    .await;
    wait_for(&mut notices, |n| matches!(n, Notice::TracksChanged(_)), blocked).await;

    // Drive the decode side to readiness; the session must report video.
    let wiring = handle.take_pipeline().await.expect("pipeline after prepare");
    wiring
        .events
        .send((
            TrackKind::Video,
            RendererEvent::StateChanged(RendererState::Ready),
        ))
        .unwrap();
    wait_for(&mut notices, |n| *n == Notice::VideoAvailable, blocked).await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::Playing);
    assert!(status.has_player);
}

// Scenario B: a blocked rating keeps any player from existing.
#[tokio::test]
async fn test_blocked_rating_prevents_playback() {
    let channel = channel_url(5);
    let rating = ContentRating::new("com.android.tv/US_TV/US_TV_MA");
    let lookup = ScriptedLookup::new(0, vec![hls_program(&channel, Some(rating.clone()))]);
    let (handle, mut notices) =
        spawn_session(lookup, RecordingSync::new(), MutablePolicy::blocking(&rating));

    handle.tune(channel);

    let notice = wait_for(
        &mut notices,
        |n| matches!(n, Notice::ContentBlocked(_)),
        no_forbidden,
    )
    .await;
    assert_eq!(notice, Notice::ContentBlocked(rating.clone()));

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::Blocked);
    assert!(!status.has_player);
    assert_eq!(status.last_blocked, Some(rating));

    // Nothing player-shaped may surface while blocked.
    tokio::time::sleep(Duration::from_millis(100)).await;
    for notice in drain(&mut notices) {
        assert!(
            !matches!(notice, Notice::VideoAvailable | Notice::TracksChanged(_)),
            "player output surfaced while blocked: {notice:?}"
        );
    }
}

// Scenario C: unblocking the blocked rating resumes the same program.
#[tokio::test]
async fn test_unblock_resumes_playback() {
    let channel = channel_url(5);
    let rating = ContentRating::new("com.android.tv/US_TV/US_TV_MA");
    let lookup = ScriptedLookup::new(0, vec![hls_program(&channel, Some(rating.clone()))]);
    let (handle, mut notices) =
        spawn_session(lookup, RecordingSync::new(), MutablePolicy::blocking(&rating));

    handle.tune(channel);
    wait_for(
        &mut notices,
        |n| matches!(n, Notice::ContentBlocked(_)),
        no_forbidden,
    )
    .await;

    handle.unblock_content(Some(rating));

    wait_for(&mut notices, |n| *n == Notice::ContentAllowed, no_forbidden).await;
    wait_for(
        &mut notices,
        |n| matches!(n, Notice::TracksChanged(_)),
        |n| matches!(n, Notice::ContentBlocked(_)),
    )
    .await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::Playing);
    assert!(status.has_player);
}

// Scenario D: unblocking a different rating is silently ignored.
#[tokio::test]
async fn test_unblock_for_other_rating_is_ignored() {
    let channel = channel_url(5);
    let rating = ContentRating::new("com.android.tv/US_TV/US_TV_MA");
    let lookup = ScriptedLookup::new(0, vec![hls_program(&channel, Some(rating.clone()))]);
    let (handle, mut notices) =
        spawn_session(lookup, RecordingSync::new(), MutablePolicy::blocking(&rating));

    handle.tune(channel);
    wait_for(
        &mut notices,
        |n| matches!(n, Notice::ContentBlocked(_)),
        no_forbidden,
    )
    .await;

    handle.unblock_content(Some(ContentRating::new("com.android.tv/US_TV/US_TV_PG")));

    tokio::time::sleep(Duration::from_millis(100)).await;
    for notice in drain(&mut notices) {
        assert!(
            !matches!(notice, Notice::ContentAllowed | Notice::TracksChanged(_)),
            "ignored unblock changed state: {notice:?}"
        );
    }
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::Blocked);
    assert!(!status.has_player);
}

// =============================================================================
// Retry and ordering properties
// =============================================================================

#[tokio::test]
async fn test_lookup_retries_until_program_appears() {
    let channel = channel_url(7);
    let misses = 3;
    let lookup = ScriptedLookup::new(misses, vec![hls_program(&channel, None)]);
    let sync = RecordingSync::new();
    let started = std::time::Instant::now();
    let (handle, mut notices) =
        spawn_session(lookup.clone(), sync.clone(), MutablePolicy::disabled());

    handle.tune(channel);
    wait_for(&mut notices, |n| matches!(n, Notice::TracksChanged(_)), no_forbidden).await;

    // One initial lookup plus one per miss, spaced by the retry delay.
    assert_eq!(lookup.calls(), misses + 1);
    assert!(started.elapsed() >= Duration::from_millis(misses as u64 * 20));
    // The out-of-band refresh goes out once, on the first miss only.
    assert_eq!(sync.calls(), 1);
}

#[tokio::test]
async fn test_stale_lookup_result_is_discarded_after_retune() {
    let slow_channel = channel_url(1);
    let fast_channel = channel_url(2);
    let bad_rating = ContentRating::new("com.android.tv/US_TV/US_TV_MA");

    let mut entries = HashMap::new();
    entries.insert(
        slow_channel.as_str().to_string(),
        (150, hls_program(&slow_channel, Some(bad_rating.clone()))),
    );
    entries.insert(
        fast_channel.as_str().to_string(),
        (0, hls_program(&fast_channel, None)),
    );
    let (handle, mut notices) = spawn_session(
        Arc::new(ChannelLookup { entries }),
        RecordingSync::new(),
        MutablePolicy::blocking(&bad_rating),
    );

    handle.tune(slow_channel);
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.tune(fast_channel);

    // Were the slow channel's program applied, its blocked rating would
    // surface as ContentBlocked.
    let blocked = |n: &Notice| matches!(n, Notice::ContentBlocked(_));
    wait_for(&mut notices, |n| matches!(n, Notice::TracksChanged(_)), blocked).await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    for notice in drain(&mut notices) {
        assert!(!blocked(&notice), "stale lookup applied: {notice:?}");
    }

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::Playing);
}

#[tokio::test]
async fn test_policy_change_releases_active_player() {
    let channel = channel_url(9);
    let rating = ContentRating::new("com.android.tv/US_TV/US_TV_14");
    let lookup = ScriptedLookup::new(0, vec![hls_program(&channel, Some(rating.clone()))]);
    let policy = MutablePolicy::disabled();
    let (handle, mut notices) = spawn_session(lookup, RecordingSync::new(), policy.clone());

    handle.tune(channel);
    wait_for(&mut notices, |n| matches!(n, Notice::TracksChanged(_)), no_forbidden).await;
    assert!(handle.status().await.unwrap().has_player);

    // Host-side broadcast: policy changed, re-check every session.
    policy.enable();
    policy.block(&rating);
    handle.check_content_block();

    wait_for(
        &mut notices,
        |n| *n == Notice::ContentBlocked(rating.clone()),
        no_forbidden,
    )
    .await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::Blocked);
    assert!(!status.has_player, "player must not survive a block");
}

#[tokio::test]
async fn test_program_end_triggers_reresolve() {
    let channel = channel_url(3);
    let stream = Url::parse("https://example.com/live/master.m3u8").unwrap();
    let ending = Program::new(
        channel.clone(),
        Utc::now() - chrono::Duration::minutes(30),
        Utc::now() + chrono::Duration::milliseconds(150),
    )
    .with_title("Ending Program")
    .with_video(SourceKind::Hls, &stream);
    let next = hls_program(&channel, None);

    let lookup = ScriptedLookup::new(0, vec![ending, next]);
    let (handle, mut notices) =
        spawn_session(lookup.clone(), RecordingSync::new(), MutablePolicy::disabled());

    handle.tune(channel);
    wait_for(&mut notices, |n| matches!(n, Notice::TracksChanged(_)), no_forbidden).await;
    // The one-shot end-of-program timer re-enters resolution for the same
    // channel and a second player is prepared.
    wait_for(&mut notices, |n| matches!(n, Notice::TracksChanged(_)), no_forbidden).await;
    assert!(lookup.calls() >= 2);
    assert!(handle.status().await.unwrap().has_player);
}

// =============================================================================
// Track selection and captions
// =============================================================================

#[tokio::test]
async fn test_subtitle_selection_requires_caption_opt_in() {
    let channel = channel_url(4);
    let lookup = ScriptedLookup::new(0, vec![hls_program(&channel, None)]);
    let (handle, mut notices) =
        spawn_session(lookup, RecordingSync::new(), MutablePolicy::disabled());

    handle.tune(channel);
    let tracks = match wait_for(
        &mut notices,
        |n| matches!(n, Notice::TracksChanged(_)),
        no_forbidden,
    )
    .await
    {
        Notice::TracksChanged(tracks) => tracks,
        _ => unreachable!(),
    };
    // HLS always advertises exactly one subtitle track.
    let subtitle_ids: Vec<_> = tracks
        .iter()
        .filter(|t| t.kind == TrackKind::Subtitle)
        .map(|t| t.id.clone())
        .collect();
    assert_eq!(subtitle_ids, vec!["1".to_string()]);

    // Captions are opt-in: selection is refused while disabled.
    assert!(
        !handle
            .select_track(TrackKind::Subtitle, Some("1".into()))
            .await
    );

    handle.set_caption_enabled(true);
    assert!(
        handle
            .select_track(TrackKind::Subtitle, Some("1".into()))
            .await
    );
    wait_for(
        &mut notices,
        |n| {
            matches!(
                n,
                Notice::TrackSelected {
                    kind: TrackKind::Subtitle,
                    id: Some(_)
                }
            )
        },
        no_forbidden,
    )
    .await;

    // Deselection is always allowed.
    assert!(handle.select_track(TrackKind::Subtitle, None).await);
}

#[tokio::test]
async fn test_cues_are_forwarded_to_the_host() {
    let channel = channel_url(6);
    let lookup = ScriptedLookup::new(0, vec![hls_program(&channel, None)]);
    let (handle, mut notices) =
        spawn_session(lookup, RecordingSync::new(), MutablePolicy::disabled());

    handle.tune(channel);
    wait_for(&mut notices, |n| matches!(n, Notice::TracksChanged(_)), no_forbidden).await;

    let wiring = handle.take_pipeline().await.unwrap();
    wiring
        .events
        .send((
            TrackKind::Subtitle,
            RendererEvent::Cues(vec![tuner_core::Cue::new("hello")]),
        ))
        .unwrap();

    let notice = wait_for(&mut notices, |n| matches!(n, Notice::Cues(_)), no_forbidden).await;
    assert_eq!(notice, Notice::Cues(vec![tuner_core::Cue::new("hello")]));
}

#[tokio::test]
async fn test_buffering_after_first_frame_reports_unavailable() {
    let channel = channel_url(8);
    let lookup = ScriptedLookup::new(0, vec![hls_program(&channel, None)]);
    let (handle, mut notices) =
        spawn_session(lookup, RecordingSync::new(), MutablePolicy::disabled());

    handle.tune(channel);
    wait_for(&mut notices, |n| matches!(n, Notice::TracksChanged(_)), no_forbidden).await;

    let wiring = handle.take_pipeline().await.unwrap();
    let send = |event| wiring.events.send((TrackKind::Video, event)).unwrap();

    send(RendererEvent::StateChanged(RendererState::Ready));
    send(RendererEvent::FrameDrawn);
    wait_for(&mut notices, |n| *n == Notice::VideoAvailable, no_forbidden).await;

    // A stall before the first frame stays silent; after it, the host hears.
    send(RendererEvent::StateChanged(RendererState::Buffering));
    wait_for(
        &mut notices,
        |n| {
            *n == Notice::VideoUnavailable(tuner_core::VideoUnavailableReason::Buffering)
        },
        no_forbidden,
    )
    .await;
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_release_cancels_pending_retries() {
    let channel = channel_url(11);
    // Miss forever.
    let lookup = ScriptedLookup::new(usize::MAX, vec![]);
    let (handle, mut notices) =
        spawn_session(lookup.clone(), RecordingSync::new(), MutablePolicy::disabled());

    handle.tune(channel);
    wait_for(
        &mut notices,
        |n| matches!(n, Notice::VideoUnavailable(_)),
        no_forbidden,
    )
    .await;

    handle.release();
    tokio::time::sleep(Duration::from_millis(60)).await;
    let after_release = lookup.calls();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(
        lookup.calls(),
        after_release,
        "retry loop survived release"
    );
    assert!(handle.status().await.is_none(), "session still answering");
}

#[tokio::test]
async fn test_source_failure_leaves_session_without_player() {
    struct FailingFetcher;

    #[async_trait]
    impl ManifestFetch for FailingFetcher {
        async fn fetch_hls(&self, _url: &Url) -> Result<HlsManifest> {
            Err(Error::ManifestFetch("connection refused".into()))
        }

        async fn fetch_mpd(&self, _url: &Url) -> Result<MpdManifest> {
            Err(Error::ManifestFetch("connection refused".into()))
        }
    }

    let channel = channel_url(12);
    let lookup = ScriptedLookup::new(0, vec![hls_program(&channel, None)]);
    let (handle, mut notices) = TunerSession::spawn_with_builder(
        "com.example.tuner/.TunerInput",
        Collaborators {
            lookup,
            guide_sync: RecordingSync::new(),
            policy: MutablePolicy::disabled(),
        },
        fast_config(),
        SourceBuilder::with_fetcher(Arc::new(FailingFetcher)),
    );

    handle.tune(channel);

    // Preparation fails once and is not retried: no tracks ever surface.
    tokio::time::sleep(Duration::from_millis(150)).await;
    for notice in drain(&mut notices) {
        assert!(
            !matches!(notice, Notice::TracksChanged(_) | Notice::VideoAvailable),
            "player output after failed source construction: {notice:?}"
        );
    }
    let status = handle.status().await.unwrap();
    assert!(status.has_player);
    assert_eq!(
        status.player_state,
        Some(tuner_core::PlayerState::Idle),
        "failed preparation must leave the player idle"
    );
}

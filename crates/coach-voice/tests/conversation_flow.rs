//! End-to-end conversations against the scripted devices and backends.

use coach_voice::scripted::{
    DeviceEvent, ScriptedRig, SynthesisOutcome, SCENARIO_REPLY, SCENARIO_TRANSCRIPT,
};
use coach_voice::{
    next_state, ChatRole, ClientError, FailureKind, PlaybackHandle, TurnMode, VoiceConfig,
    VoiceError, VoiceSettings, VoiceState,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::time::Duration;
use tokio_test::assert_ok;

use VoiceState::*;

fn barge_in_config() -> VoiceConfig {
    let mut config = VoiceConfig::default();
    config.settings.barge_in_enabled = true;
    config
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("coach_voice=debug")
        .try_init();
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Start a session and say one sentence.
async fn speak_once(rig: &ScriptedRig) {
    assert_ok!(rig.handle.start_session());
    rig.ui.wait_for_path(&[Listening]).await;
    rig.mic.speech(Duration::from_millis(1500));
    rig.mic.silence(Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn single_turn_round_trip() {
    init_tracing();
    let rig = ScriptedRig::spawn(VoiceConfig::default());
    assert_ok!(rig.handle.start_session());
    rig.ui.wait_for_path(&[Listening]).await;

    rig.mic.speech(Duration::from_secs(3));
    rig.mic.silence(Duration::from_millis(1200));
    rig.ui.wait_for_path(&[Processing, Speaking, Listening]).await;

    assert_eq!(
        rig.ui.state_path(),
        vec![Idle, Listening, Processing, Speaking, Listening]
    );
    assert_eq!(rig.devices.rendered(), vec![0, 1, 2]);

    // The microphone comes back only after the last chunk played.
    let events = rig.devices.events();
    let last_chunk = events
        .iter()
        .rposition(|e| matches!(e, DeviceEvent::ChunkRendered { .. }))
        .unwrap();
    let reacquired = events
        .iter()
        .rposition(|e| *e == DeviceEvent::CaptureAcquired)
        .unwrap();
    assert!(reacquired > last_chunk);
    assert!(rig.devices.capture_held());
    assert!(!rig.devices.playback_held());

    // Partial captions stream before the final one, numbered in order.
    let captions = rig.ui.transcripts();
    let last = captions.last().unwrap();
    assert!(last.is_final);
    assert_eq!(last.text, SCENARIO_TRANSCRIPT);
    assert!(captions.len() > 1);
    assert!(captions[..captions.len() - 1].iter().all(|c| !c.is_final));
    for (i, caption) in captions.iter().enumerate() {
        assert_eq!(caption.seq as usize, i);
        assert_eq!(caption.utterance_id, last.utterance_id);
    }

    let requests = rig.synthesizer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text, SCENARIO_REPLY);
    assert!(rig.ui.errors().is_empty());
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn barge_in_cuts_the_reply_short() {
    init_tracing();
    let rig = ScriptedRig::spawn(barge_in_config());
    assert_ok!(rig.handle.start_session());
    rig.ui.wait_for_path(&[Listening]).await;
    rig.mic.speech(Duration::from_millis(1500));
    rig.mic.silence(Duration::from_secs(1));

    rig.devices
        .wait_until(|events| events.iter().any(|e| matches!(e, DeviceEvent::ChunkRendered { .. })))
        .await;
    assert_eq!(rig.ui.state_path().last(), Some(&Speaking));
    assert!(rig.mic.is_live());

    rig.mic.speech(Duration::from_millis(600));
    rig.ui.wait_for_path(&[Speaking, Interrupted, Listening]).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(rig.devices.rendered(), vec![0]);
    assert!(!rig.devices.playback_held());
    assert!(rig.devices.capture_held());

    // The interrupting speech becomes the next turn, with the cut reply in context.
    rig.mic.silence(Duration::from_secs(1));
    rig.ui.wait_for_path(&[Processing, Speaking]).await;
    let requests = rig.responder.requests();
    assert_eq!(requests.len(), 2);
    let history = &requests[1].1;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, ChatRole::User);
    assert_eq!(history[1].role, ChatRole::Assistant);
    assert_eq!(history[1].text, SCENARIO_REPLY);
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn quiet_speaker_does_not_barge_in() {
    let rig = ScriptedRig::spawn(VoiceConfig::default());
    assert_ok!(rig.handle.start_session());
    rig.ui.wait_for_path(&[Listening]).await;
    rig.mic.speech(Duration::from_millis(1500));
    rig.mic.silence(Duration::from_secs(1));
    rig.ui.wait_for_path(&[Speaking]).await;

    // Barge-in is off, so the microphone is closed while the coach talks.
    assert!(!rig.mic.is_live());
    assert_eq!(rig.mic.speech(Duration::from_millis(600)), 0);
    rig.ui.wait_for_path(&[Speaking, Listening]).await;
    assert_eq!(rig.devices.rendered(), vec![0, 1, 2]);
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn push_to_talk_waits_for_the_button() {
    let mut config = VoiceConfig::default();
    config.settings.turn_mode = TurnMode::PushToTalk;
    let rig = ScriptedRig::spawn(config);
    assert_ok!(rig.handle.start_session());
    rig.ui.wait_for_path(&[Listening]).await;

    rig.mic.speech(Duration::from_secs(2));
    rig.mic.silence(Duration::from_secs(2));
    settle().await;
    assert_eq!(rig.ui.state_path(), vec![Idle, Listening]);

    assert_ok!(rig.handle.manual_press());
    settle().await;
    rig.mic.speech(Duration::from_secs(1));
    settle().await;
    assert_ok!(rig.handle.manual_stop());
    rig.ui.wait_for_path(&[Processing, Speaking, Listening]).await;
    assert_eq!(rig.transcriber.received().len(), 1);
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn short_noise_is_discarded() {
    let rig = ScriptedRig::spawn(VoiceConfig::default());
    assert_ok!(rig.handle.start_session());
    rig.ui.wait_for_path(&[Listening]).await;

    rig.mic.speech(Duration::from_millis(150));
    rig.mic.silence(Duration::from_secs(2));
    settle().await;
    assert_eq!(rig.ui.state_path(), vec![Idle, Listening]);
    assert!(rig.transcriber.received().is_empty());
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn settings_update_changes_the_next_synthesis() {
    let rig = ScriptedRig::spawn(VoiceConfig::default());
    assert_ok!(rig.handle.start_session());
    rig.ui.wait_for_path(&[Listening]).await;
    assert_ok!(rig.handle.update_settings(VoiceSettings {
        low_latency_mode: true,
        ..VoiceSettings::default()
    }));
    settle().await;

    rig.mic.speech(Duration::from_secs(1));
    rig.mic.silence(Duration::from_secs(1));
    rig.ui.wait_for_path(&[Speaking, Listening]).await;
    assert!(rig.synthesizer.requests()[0].low_latency);
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_devices() {
    let rig = ScriptedRig::spawn(barge_in_config());
    assert_ok!(rig.handle.start_session());
    rig.ui.wait_for_path(&[Listening]).await;
    rig.mic.speech(Duration::from_millis(1500));
    rig.mic.silence(Duration::from_secs(1));
    rig.ui.wait_for_path(&[Speaking]).await;

    let devices = rig.devices.clone();
    let handle = rig.handle.clone();
    rig.finish().await;
    assert!(!devices.capture_held());
    assert!(!devices.playback_held());
    assert!(handle.start_session().is_err());
}

#[tokio::test(start_paused = true)]
async fn long_reply_plays_to_the_end() {
    let mut config = VoiceConfig::default();
    config.chunk_buffer = 1;
    config.clients.synthesis_ms = 1500;
    let rig = ScriptedRig::spawn(config);
    // Five seconds of audio through a one-chunk buffer.
    rig.synthesizer.push_outcome(SynthesisOutcome::Chunks(20));
    speak_once(&rig).await;

    rig.ui.wait_for_path(&[Processing, Speaking, Listening]).await;
    assert_eq!(rig.devices.rendered(), (0..20).collect::<Vec<u32>>());
    assert_eq!(rig.synthesizer.requests().len(), 1);
    assert!(rig.ui.errors().is_empty());
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_synthesis_fails_without_replaying_audio() {
    let mut config = VoiceConfig::default();
    config.clients.synthesis_ms = 1500;
    let rig = ScriptedRig::spawn(config);
    rig.synthesizer.push_outcome(SynthesisOutcome::StallAfter(1));
    speak_once(&rig).await;

    rig.ui.wait_for_path(&[Speaking, Error]).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(rig.devices.rendered(), vec![0]);
    assert_eq!(rig.synthesizer.requests().len(), 1);
    let errors = rig.ui.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, FailureKind::Timeout);
    assert!(!rig.devices.playback_held());
    assert!(!rig.devices.capture_held());
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn response_failure_surfaces_a_retryable_error() {
    let rig = ScriptedRig::spawn(VoiceConfig::default());
    rig.responder
        .push_outcome(Err(ClientError::Service("bad gateway".into())));
    speak_once(&rig).await;

    rig.ui.wait_for_path(&[Processing, Error]).await;
    assert_eq!(rig.ui.state_path(), vec![Idle, Listening, Processing, Error]);
    assert_eq!(rig.responder.requests().len(), 1);
    assert!(rig.synthesizer.requests().is_empty());
    let errors = rig.ui.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, FailureKind::Service);
    assert!(errors[0].retryable);
    assert!(!rig.devices.capture_held());
    assert!(!rig.devices.playback_held());

    assert_ok!(rig.handle.retry());
    rig.ui.wait_for_path(&[Error, Listening]).await;
    assert!(rig.devices.capture_held());
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn response_timeout_is_retried_once_then_surfaced() {
    let rig = ScriptedRig::spawn(VoiceConfig::default());
    rig.responder.push_outcome(Err(ClientError::Timeout));
    rig.responder.push_outcome(Err(ClientError::Timeout));
    speak_once(&rig).await;

    rig.ui.wait_for_path(&[Processing, Error]).await;
    assert_eq!(rig.responder.requests().len(), 2);
    assert_eq!(rig.ui.errors()[0].kind, FailureKind::Timeout);
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn flaky_response_recovers_on_retry() {
    let rig = ScriptedRig::spawn(VoiceConfig::default());
    rig.responder
        .push_outcome(Err(ClientError::Network("connection reset".into())));
    speak_once(&rig).await;

    rig.ui.wait_for_path(&[Processing, Speaking, Listening]).await;
    assert_eq!(rig.responder.requests().len(), 2);
    assert_eq!(rig.devices.rendered(), vec![0, 1, 2]);
    assert!(rig.ui.errors().is_empty());
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn synthesis_failure_mid_reply_stops_playback() {
    let rig = ScriptedRig::spawn(barge_in_config());
    rig.synthesizer.push_outcome(SynthesisOutcome::FailAfter(
        2,
        ClientError::Network("stream dropped".into()),
    ));
    speak_once(&rig).await;

    rig.ui.wait_for_path(&[Speaking, Error]).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    // Audio already went out, so the stream is not requested again.
    assert_eq!(rig.synthesizer.requests().len(), 1);
    assert!(rig.devices.rendered().is_empty());
    assert!(rig
        .devices
        .events()
        .iter()
        .any(|e| matches!(e, DeviceEvent::PlaybackCancelled(_))));
    assert_eq!(rig.ui.errors()[0].kind, FailureKind::Network);
    assert!(!rig.devices.playback_held());
    assert!(!rig.devices.capture_held());
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn playback_that_cannot_start_never_shows_speaking() {
    let rig = ScriptedRig::spawn(VoiceConfig::default());
    rig.fail_next_play(VoiceError::Playback("no output device".into()));
    speak_once(&rig).await;

    rig.ui.wait_for_path(&[Processing, Error]).await;
    assert_eq!(rig.ui.state_path(), vec![Idle, Listening, Processing, Error]);
    assert!(rig.synthesizer.requests().is_empty());
    assert_eq!(rig.ui.errors()[0].kind, FailureKind::Device);
    assert!(!rig.devices.playback_held());
    rig.finish().await;
}

// -----------------------------------------------------------------------------
// Random operation sequences
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Start,
    Press,
    Stop,
    Retry,
    Teardown,
    Speak(u64),
    Quiet(u64),
    Wait(u64),
    BargeIn(bool),
    Mode(TurnMode),
    FailNextStart,
    FailTranscription,
    FailResponse(bool),
    FailSynthesis(u32),
    FailPlay,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Start),
        1 => Just(Op::Press),
        1 => Just(Op::Stop),
        1 => Just(Op::Retry),
        1 => Just(Op::Teardown),
        4 => (60u64..2000).prop_map(Op::Speak),
        4 => (60u64..2000).prop_map(Op::Quiet),
        3 => (10u64..1500).prop_map(Op::Wait),
        1 => any::<bool>().prop_map(Op::BargeIn),
        1 => prop_oneof![Just(TurnMode::Automatic), Just(TurnMode::PushToTalk)].prop_map(Op::Mode),
        1 => Just(Op::FailNextStart),
        1 => Just(Op::FailTranscription),
        1 => any::<bool>().prop_map(Op::FailResponse),
        1 => (0u32..3).prop_map(Op::FailSynthesis),
        1 => Just(Op::FailPlay),
    ]
}

async fn apply(rig: &ScriptedRig, op: &Op, settings: &mut VoiceSettings) {
    match op {
        Op::Start => {
            let _ = rig.handle.start_session();
        }
        Op::Press => {
            let _ = rig.handle.manual_press();
        }
        Op::Stop => {
            let _ = rig.handle.manual_stop();
        }
        Op::Retry => {
            let _ = rig.handle.retry();
        }
        Op::Teardown => {
            let _ = rig.handle.teardown();
        }
        Op::Speak(ms) => {
            rig.mic.speech(Duration::from_millis(*ms));
        }
        Op::Quiet(ms) => {
            rig.mic.silence(Duration::from_millis(*ms));
        }
        Op::Wait(ms) => tokio::time::sleep(Duration::from_millis(*ms)).await,
        Op::BargeIn(on) => {
            settings.barge_in_enabled = *on;
            let _ = rig.handle.update_settings(settings.clone());
        }
        Op::Mode(mode) => {
            settings.turn_mode = *mode;
            let _ = rig.handle.update_settings(settings.clone());
        }
        Op::FailNextStart => rig
            .mic
            .fail_next_start(VoiceError::DeviceBusy("scripted".into())),
        Op::FailTranscription => rig
            .transcriber
            .push_outcome(Err(ClientError::Service("scripted".into()))),
        Op::FailResponse(timeout) => rig.responder.push_outcome(Err(if *timeout {
            ClientError::Timeout
        } else {
            ClientError::Service("scripted".into())
        })),
        Op::FailSynthesis(after) => rig.synthesizer.push_outcome(SynthesisOutcome::FailAfter(
            *after,
            ClientError::Network("scripted".into()),
        )),
        Op::FailPlay => rig.fail_next_play(VoiceError::Playback("scripted".into())),
    }
    settle().await;
}

fn no_render_after_cancel(events: &[DeviceEvent]) -> bool {
    let mut closed: HashSet<PlaybackHandle> = HashSet::new();
    for event in events {
        match event {
            DeviceEvent::PlaybackCancelled(h) | DeviceEvent::PlaybackReleased(h) => {
                closed.insert(*h);
            }
            DeviceEvent::ChunkRendered { handle, .. } if closed.contains(handle) => return false,
            _ => {}
        }
    }
    true
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn any_operation_sequence_stays_legal(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        let (changes, events, final_state) = runtime.block_on(async {
            let rig = ScriptedRig::spawn(VoiceConfig::default());
            let mut settings = VoiceSettings::default();
            for op in &ops {
                apply(&rig, op, &mut settings).await;
            }
            let _ = rig.handle.teardown();
            tokio::time::sleep(Duration::from_secs(5)).await;

            let recorded = rig.ui.snapshot();
            let events = rig.devices.events();
            let state = rig.ui.current_state();
            rig.finish().await;
            (recorded.changes, events, state)
        });

        // Every change is a legal transition and they chain.
        for change in &changes {
            prop_assert_eq!(next_state(change.from, change.trigger), Some(change.to));
        }
        for pair in changes.windows(2) {
            prop_assert_eq!(pair[0].to, pair[1].from);
        }
        prop_assert_eq!(final_state, Idle);

        // Devices are balanced once torn down.
        let count = |want: fn(&DeviceEvent) -> bool| events.iter().filter(|e| want(e)).count();
        prop_assert_eq!(
            count(|e| *e == DeviceEvent::CaptureAcquired),
            count(|e| *e == DeviceEvent::CaptureReleased)
        );
        prop_assert_eq!(
            count(|e| matches!(e, DeviceEvent::PlaybackAcquired(_))),
            count(|e| matches!(e, DeviceEvent::PlaybackReleased(_)))
        );
        prop_assert!(no_render_after_cancel(&events));
    }
}

//! Scripted Session Demo: one full coaching turn without hardware or network.
//!
//! Feeds synthetic speech into a scripted microphone, lets the scripted
//! transcriber/responder/synthesizer answer, and logs every state change,
//! caption, and device event. Run with `RUST_LOG=debug` to see levels too.
//!
//! Set `COACH_VOICE_SETTINGS__BARGE_IN_ENABLED=true` to also interrupt the reply.

use coach_voice::scripted::{RecordingFeedback, ScriptedRig};
use coach_voice::{TracingFeedback, VoiceConfig, VoiceState};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = VoiceConfig::load()?;
    let barge_in = config.settings.barge_in_enabled;
    let (orchestrator, mut rig) = ScriptedRig::build_with_ui(
        config,
        Arc::new(RecordingFeedback::default()),
        Some(Arc::new(TracingFeedback)),
    );
    rig.attach(tokio::spawn(orchestrator.run()));

    info!("🗣️ Scripted user starts talking");
    rig.handle.start_session()?;
    rig.ui.wait_for_path(&[VoiceState::Listening]).await;
    rig.mic.speech(Duration::from_millis(1500));
    rig.mic.silence(Duration::from_secs(1));

    if barge_in {
        rig.ui.wait_for_path(&[VoiceState::Speaking]).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        info!("✋ Scripted user talks over the coach");
        rig.mic.speech(Duration::from_millis(600));
        rig.ui
            .wait_for_path(&[VoiceState::Interrupted, VoiceState::Listening])
            .await;
    } else {
        rig.ui
            .wait_for_path(&[VoiceState::Speaking, VoiceState::Listening])
            .await;
    }

    info!("States: {:?}", rig.ui.state_path());
    info!("Chunks rendered: {:?}", rig.devices.rendered());
    for event in rig.devices.events() {
        info!("  device: {:?}", event);
    }
    rig.finish().await;
    Ok(())
}

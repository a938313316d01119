#![forbid(unsafe_code)]

// Speaking detection - volume smoothing and the mute/unmute feedback machine
// driven by the external voice-activity detector

use crate::media::MediaTrack;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events from the voice-activity detector (hark-style).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolumeEvent {
    /// Current level in dB (negative, 0 = loudest).
    Volume(f32),
    Speaking,
    StoppedSpeaking,
}

pub type VolumeEvents = mpsc::UnboundedReceiver<VolumeEvent>;

/// External voice-activity detection library. The detector owns its analyser
/// and closes the event stream when the track ends.
pub trait VoiceActivityDetector: Send + Sync {
    fn attach(&self, track: Arc<dyn MediaTrack>) -> VolumeEvents;
}

/// Round a dB level for store publication; volume deltas below 1 dB after
/// rounding are coalesced away by comparing these.
pub fn rounded_db(volume: f32) -> i16 {
    volume.round() as i16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeakingPhase {
    #[default]
    Idle,
    Speaking,
    /// Silence auto-paused the mic; the next speech burst resumes it.
    PausedAuto,
}

/// Mic side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicCommand {
    Resume,
    PauseAuto,
}

/// Outcome of feeding one detector event through the machine.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeakingUpdate {
    /// Smoothed volume to publish, when it moved at least `VOLUME_STEP` dB.
    pub volume: Option<f32>,
    pub speaking: Option<bool>,
    pub mic: Option<MicCommand>,
}

/// Minimum smoothed change worth publishing.
const VOLUME_STEP: f32 = 0.5;
/// Weight of the previous level when the signal drops, so meters fall
/// smoothly instead of flickering.
const DOWNWARD_DECAY: f32 = 0.7;

/// Small explicit state machine for the
/// volume -> speaking -> auto-mute feedback loop.
#[derive(Debug, Default)]
pub struct SpeakingMachine {
    phase: SpeakingPhase,
    smoothed: f32,
    published: f32,
}

impl SpeakingMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SpeakingPhase {
        self.phase
    }

    /// Feed one detector event. `voice_activated_unmute` and `mic_paused`
    /// are sampled by the caller at dispatch time.
    pub fn on_event(
        &mut self,
        event: VolumeEvent,
        voice_activated_unmute: bool,
        mic_paused: bool,
    ) -> SpeakingUpdate {
        let mut update = SpeakingUpdate::default();

        match event {
            VolumeEvent::Volume(db) => {
                self.smoothed = if db < self.smoothed {
                    self.smoothed * DOWNWARD_DECAY + db * (1.0 - DOWNWARD_DECAY)
                } else {
                    db
                };
                if (self.smoothed - self.published).abs() >= VOLUME_STEP {
                    self.published = self.smoothed;
                    update.volume = Some(self.smoothed);
                }
            }
            VolumeEvent::Speaking => {
                if self.phase != SpeakingPhase::Speaking {
                    update.speaking = Some(true);
                    if voice_activated_unmute
                        && (mic_paused || self.phase == SpeakingPhase::PausedAuto)
                    {
                        update.mic = Some(MicCommand::Resume);
                    }
                    self.phase = SpeakingPhase::Speaking;
                }
            }
            VolumeEvent::StoppedSpeaking => {
                if self.phase == SpeakingPhase::Speaking {
                    update.speaking = Some(false);
                    if voice_activated_unmute {
                        update.mic = Some(MicCommand::PauseAuto);
                        self.phase = SpeakingPhase::PausedAuto;
                    } else {
                        self.phase = SpeakingPhase::Idle;
                    }
                }
            }
        }

        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_volume_changes_are_coalesced() {
        let mut machine = SpeakingMachine::new();

        let update = machine.on_event(VolumeEvent::Volume(-40.0), false, false);
        assert!(update.volume.is_some());

        // rising by less than the step: suppressed
        let update = machine.on_event(VolumeEvent::Volume(-39.8), false, false);
        assert_eq!(update.volume, None);

        let update = machine.on_event(VolumeEvent::Volume(-30.0), false, false);
        assert_eq!(update.volume, Some(-30.0));
    }

    #[test]
    fn downward_volume_decays_instead_of_dropping() {
        let mut machine = SpeakingMachine::new();
        machine.on_event(VolumeEvent::Volume(-20.0), false, false);

        let update = machine.on_event(VolumeEvent::Volume(-80.0), false, false);
        let smoothed = update.volume.expect("large drop publishes");
        assert!(smoothed > -80.0 && smoothed < -20.0);
    }

    #[test]
    fn speaking_transitions_without_voice_activation() {
        let mut machine = SpeakingMachine::new();

        let update = machine.on_event(VolumeEvent::Speaking, false, false);
        assert_eq!(update.speaking, Some(true));
        assert_eq!(update.mic, None);
        assert_eq!(machine.phase(), SpeakingPhase::Speaking);

        // repeated speaking events are idempotent
        let update = machine.on_event(VolumeEvent::Speaking, false, false);
        assert_eq!(update, SpeakingUpdate::default());

        let update = machine.on_event(VolumeEvent::StoppedSpeaking, false, false);
        assert_eq!(update.speaking, Some(false));
        assert_eq!(update.mic, None);
        assert_eq!(machine.phase(), SpeakingPhase::Idle);
    }

    #[test]
    fn voice_activated_unmute_pauses_and_resumes() {
        let mut machine = SpeakingMachine::new();

        // speech while manually paused resumes the mic
        let update = machine.on_event(VolumeEvent::Speaking, true, true);
        assert_eq!(update.mic, Some(MicCommand::Resume));

        // silence auto-pauses
        let update = machine.on_event(VolumeEvent::StoppedSpeaking, true, false);
        assert_eq!(update.mic, Some(MicCommand::PauseAuto));
        assert_eq!(machine.phase(), SpeakingPhase::PausedAuto);

        // next speech burst resumes even though the caller saw the mic paused
        let update = machine.on_event(VolumeEvent::Speaking, true, true);
        assert_eq!(update.mic, Some(MicCommand::Resume));
        assert_eq!(machine.phase(), SpeakingPhase::Speaking);
    }

    #[test]
    fn stopped_speaking_in_idle_is_a_no_op() {
        let mut machine = SpeakingMachine::new();
        let update = machine.on_event(VolumeEvent::StoppedSpeaking, true, false);
        assert_eq!(update, SpeakingUpdate::default());
        assert_eq!(machine.phase(), SpeakingPhase::Idle);
    }
}

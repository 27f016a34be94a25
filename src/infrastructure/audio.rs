use crate::infrastructure::config::SoundSettings;
use crate::infrastructure::error::SyncError;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundCue {
    TimerStart,
    TimerAlarm,
    Notification,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    pub cue: SoundCue,
    pub file: String,
    pub volume: f32,
}

/// Playback backend. Calls must return promptly; playback itself is the
/// backend's business.
pub trait AudioPort: Send + Sync {
    fn play(&self, request: &PlayRequest) -> Result<(), SyncError>;
    fn stop(&self) -> Result<(), SyncError>;
}

#[derive(Debug, Default)]
pub struct NoopAudio;

impl AudioPort for NoopAudio {
    fn play(&self, request: &PlayRequest) -> Result<(), SyncError> {
        log::debug!("audio disabled; dropping cue={:?}", request.cue);
        Ok(())
    }

    fn stop(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Per-component sound handle. A new request always stops the one before it;
/// the cues of one request (alarm plus notification) play together. Backend
/// failures are logged and swallowed so no state transition ever waits on
/// audio.
pub struct Notifier {
    port: Arc<dyn AudioPort>,
    timer_sound: SoundSettings,
    notification_sound: SoundSettings,
    active: Mutex<Vec<SoundCue>>,
}

impl Notifier {
    pub fn new(
        port: Arc<dyn AudioPort>,
        timer_sound: SoundSettings,
        notification_sound: SoundSettings,
    ) -> Self {
        Self {
            port,
            timer_sound,
            notification_sound,
            active: Mutex::new(Vec::new()),
        }
    }

    pub fn silent() -> Self {
        let muted = SoundSettings {
            enabled: false,
            ..SoundSettings::default()
        };
        Self::new(Arc::new(NoopAudio), muted.clone(), muted)
    }

    pub fn active_cues(&self) -> Vec<SoundCue> {
        match self.active.lock() {
            Ok(active) => active.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn timer_started(&self) {
        if self.notification_sound.enabled {
            self.silence();
            self.play(SoundCue::TimerStart, &self.notification_sound);
        }
    }

    /// Alarm at completion; the notification sound only plays when it is a
    /// different file from the alarm.
    pub fn time_up(&self) {
        self.silence();
        if self.timer_sound.enabled {
            self.play(SoundCue::TimerAlarm, &self.timer_sound);
        }
        let duplicate = self.timer_sound.enabled && self.timer_sound.file == self.notification_sound.file;
        if self.notification_sound.enabled && !duplicate {
            self.play(SoundCue::Notification, &self.notification_sound);
        }
    }

    pub fn silence(&self) {
        let previous = match self.active.lock() {
            Ok(mut active) => std::mem::take(&mut *active),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if previous.is_empty() {
            return;
        }
        if let Err(error) = self.port.stop() {
            log::warn!("failed to stop sound: {error}");
        }
    }

    fn play(&self, cue: SoundCue, settings: &SoundSettings) {
        let request = PlayRequest {
            cue,
            file: settings.file.clone(),
            volume: settings.volume.clamp(0.0, 1.0),
        };
        match self.port.play(&request) {
            Ok(()) => match self.active.lock() {
                Ok(mut active) => active.push(cue),
                Err(poisoned) => poisoned.into_inner().push(cue),
            },
            Err(error) => log::warn!("failed to play cue={cue:?}: {error}"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{AudioCall, RecordingAudio};
    use super::*;

    fn sound(enabled: bool, file: &str) -> SoundSettings {
        SoundSettings {
            enabled,
            file: file.to_string(),
            volume: 0.5,
        }
    }

    #[test]
    fn alarm_and_notification_play_together() {
        let audio = Arc::new(RecordingAudio::default());
        let notifier = Notifier::new(audio.clone(), sound(true, "alarm.mp3"), sound(true, "bell.mp3"));

        notifier.time_up();

        assert_eq!(
            audio.calls(),
            vec![
                AudioCall::Play(SoundCue::TimerAlarm),
                AudioCall::Play(SoundCue::Notification),
            ]
        );
        assert_eq!(
            notifier.active_cues(),
            vec![SoundCue::TimerAlarm, SoundCue::Notification]
        );
    }

    #[test]
    fn new_request_stops_the_previous_one() {
        let audio = Arc::new(RecordingAudio::default());
        let notifier = Notifier::new(audio.clone(), sound(true, "alarm.mp3"), sound(true, "bell.mp3"));

        notifier.timer_started();
        notifier.time_up();

        assert_eq!(
            audio.calls(),
            vec![
                AudioCall::Play(SoundCue::TimerStart),
                AudioCall::Stop,
                AudioCall::Play(SoundCue::TimerAlarm),
                AudioCall::Play(SoundCue::Notification),
            ]
        );
    }

    #[test]
    fn same_file_notification_is_skipped() {
        let audio = Arc::new(RecordingAudio::default());
        let notifier = Notifier::new(audio.clone(), sound(true, "alarm.mp3"), sound(true, "alarm.mp3"));

        notifier.time_up();
        notifier.silence();
        notifier.silence();

        assert_eq!(
            audio.calls(),
            vec![AudioCall::Play(SoundCue::TimerAlarm), AudioCall::Stop]
        );
    }

    #[test]
    fn playback_failures_are_swallowed() {
        let audio = Arc::new(RecordingAudio {
            fail_play: true,
            ..RecordingAudio::default()
        });
        let notifier = Notifier::new(audio.clone(), sound(false, "a"), sound(true, "b"));

        notifier.timer_started();

        assert_eq!(audio.calls(), vec![AudioCall::Play(SoundCue::TimerStart)]);
        assert!(notifier.active_cues().is_empty());
    }
}

//! Voice dictation as a start/stop subscription.
//!
//! A [`SpeechRecognizer`] turns a platform speech-to-text source into a
//! channel of [`TranscriptEvent`]s. [`Dictation`] owns the recording flag and
//! merges final results into an [`InputDraft`].

use crate::composer::InputDraft;
use crate::error::{ChatError, Result};
use std::sync::Mutex;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictationConfig {
    pub locale: String,
    pub continuous: bool,
    pub interim_results: bool,
}

impl Default for DictationConfig {
    fn default() -> Self {
        Self {
            locale: "de-DE".to_string(),
            continuous: true,
            interim_results: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    Result { transcript: String, is_final: bool },
    Error(String),
    End,
}

/// Platform speech-to-text capability.
pub trait SpeechRecognizer: Send + Sync {
    /// Begins recognition; events arrive on the returned receiver until
    /// `End` or `Error`, or until the channel closes.
    fn start(&self, config: &DictationConfig) -> Result<mpsc::Receiver<TranscriptEvent>>;
    fn stop(&self);
}

/// Recognizer fed through a sender by whatever bridges the actual speech engine.
#[derive(Default)]
pub struct ChannelRecognizer {
    sender: Mutex<Option<mpsc::Sender<TranscriptEvent>>>,
}

impl ChannelRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sender for the running recognition, if any.
    pub fn feeder(&self) -> Option<mpsc::Sender<TranscriptEvent>> {
        self.sender.lock().ok().and_then(|s| s.clone())
    }
}

impl SpeechRecognizer for ChannelRecognizer {
    fn start(&self, config: &DictationConfig) -> Result<mpsc::Receiver<TranscriptEvent>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut sender = self
            .sender
            .lock()
            .map_err(|_| ChatError::Validation("speech recognizer is unavailable".to_string()))?;
        *sender = Some(tx);
        log::info!(
            "Dictation started (locale {}, continuous: {}, interim: {})",
            config.locale,
            config.continuous,
            config.interim_results
        );
        Ok(rx)
    }

    fn stop(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            if let Some(tx) = sender.take() {
                // Receiver sees End once the queued results are drained.
                let _ = tx.try_send(TranscriptEvent::End);
            }
        }
        log::info!("Dictation stopped");
    }
}

/// Recording state for one input field.
pub struct Dictation<R: SpeechRecognizer> {
    recognizer: R,
    config: DictationConfig,
    events: Option<mpsc::Receiver<TranscriptEvent>>,
}

impl<R: SpeechRecognizer> Dictation<R> {
    pub fn new(recognizer: R, config: DictationConfig) -> Self {
        Self {
            recognizer,
            config,
            events: None,
        }
    }

    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    pub fn is_recording(&self) -> bool {
        self.events.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_recording() {
            return Ok(());
        }
        self.events = Some(self.recognizer.start(&self.config)?);
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.events.take().is_some() {
            self.recognizer.stop();
        }
    }

    /// Starts when idle, stops when recording. Returns the new recording state.
    pub fn toggle(&mut self) -> Result<bool> {
        if self.is_recording() {
            self.stop();
        } else {
            self.start()?;
        }
        Ok(self.is_recording())
    }

    /// Applies every pending event to `draft` without waiting. Only final
    /// results are used; `Error`, `End` or a closed channel end the recording.
    pub fn pump(&mut self, draft: &mut InputDraft) -> usize {
        let mut applied = 0;
        let Some(events) = self.events.as_mut() else {
            return applied;
        };

        loop {
            match events.try_recv() {
                Ok(TranscriptEvent::Result {
                    transcript,
                    is_final,
                }) => {
                    if is_final || self.config.interim_results {
                        draft.append_transcript(&transcript);
                        applied += 1;
                    }
                }
                Ok(TranscriptEvent::Error(message)) => {
                    log::error!("Speech recognition error: {}", message);
                    self.events = None;
                    break;
                }
                Ok(TranscriptEvent::End) | Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.events = None;
                    break;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
            }
        }
        applied
    }
}

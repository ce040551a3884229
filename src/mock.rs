//! Scripted provider for driving the controller without network access.

use crate::api::{DeltaStream, LLMApiProvider};
use crate::error::{ChatError, Result};
use crate::models::{Message, Profile};
use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// One pre-programmed reaction to a `stream_reply` call.
pub enum MockResponse {
    /// Yield these fragments, then end normally.
    Fragments(Vec<String>),
    /// Fail before any stream is returned.
    FailToOpen(ChatError),
    /// Yield these fragments, then fail mid-stream.
    FailAfter(Vec<String>, ChatError),
    /// Wait for the gate to open before yielding the fragments.
    Gated(oneshot::Receiver<()>, Vec<String>),
}

impl MockResponse {
    pub fn text(fragments: &[&str]) -> Self {
        Self::Fragments(fragments.iter().map(|f| f.to_string()).collect())
    }
}

/// Arguments of a recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub history: Vec<Message>,
    pub new_text: String,
    pub new_image: Option<String>,
    pub profile: Profile,
}

/// Provider returning pre-programmed responses in sequence.
#[derive(Default)]
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LLMApiProvider for MockProvider {
    async fn stream_reply(
        &self,
        history: &[Message],
        new_text: &str,
        new_image: Option<&str>,
        profile: Profile,
    ) -> Result<DeltaStream> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                history: history.to_vec(),
                new_text: new_text.to_string(),
                new_image: new_image.map(str::to_string),
                profile,
            });
        }

        let next = self.responses.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            Some(MockResponse::Fragments(fragments)) => {
                Ok(Box::pin(stream::iter(fragments.into_iter().map(Ok::<String, ChatError>))))
            }
            Some(MockResponse::FailToOpen(error)) => Err(error),
            Some(MockResponse::FailAfter(fragments, error)) => Ok(Box::pin(
                stream::iter(fragments.into_iter().map(Ok::<String, ChatError>)).chain(stream::once(async move { Err(error) })),
            )),
            Some(MockResponse::Gated(gate, fragments)) => {
                let opened = stream::once(async move {
                    let _ = gate.await;
                    stream::iter(fragments.into_iter().map(Ok::<String, ChatError>))
                })
                .flatten();
                Ok(Box::pin(opened))
            }
            None => Err(ChatError::Upstream(
                "MockProvider: no response configured for this call".to_string(),
            )),
        }
    }
}

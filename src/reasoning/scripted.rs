//! Scripted reasoning client for tests and offline runs.

use std::collections::VecDeque;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ReasoningClient, ReasoningRequest, ReasoningTransportError};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text.
    Respond(String),
    /// Fail at the transport level.
    Fail(ReasoningTransportError),
    /// Sleep, then return this text.
    Delayed(Duration, String),
}

/// Reasoning client that replays a fixed script of replies.
///
/// Records every request it receives. Once the script is exhausted every
/// call fails with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedReasoningClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedReasoningClient {
    /// Create a client with a script.
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Client that answers once with `text`.
    pub fn responding(text: impl Into<String>) -> Self {
        Self::new([ScriptedReply::Respond(text.into())])
    }

    /// Append a reply to the script.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().push_back(reply);
    }

    /// Number of calls made.
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoningClient {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningTransportError> {
        self.requests.lock().push(request.clone());
        let reply = self.replies.lock().pop_front();

        match reply {
            Some(ScriptedReply::Respond(text)) => Ok(text),
            Some(ScriptedReply::Fail(err)) => Err(err),
            Some(ScriptedReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(ReasoningTransportError::Other("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request() -> ReasoningRequest {
        ReasoningRequest {
            check_id: Uuid::new_v4(),
            instructions: String::new(),
            target_document_ref: "t".to_string(),
            target_text: String::new(),
            manifest_version: String::new(),
            passages: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_replays_in_order_then_exhausts() {
        let client = ScriptedReasoningClient::new([
            ScriptedReply::Fail(ReasoningTransportError::Unreachable("down".to_string())),
            ScriptedReply::Respond("ok".to_string()),
        ]);

        assert!(client.complete(&request()).await.is_err());
        assert_eq!(client.complete(&request()).await.unwrap(), "ok");
        assert!(matches!(
            client.complete(&request()).await,
            Err(ReasoningTransportError::Other(_))
        ));
        assert_eq!(client.calls(), 3);
    }
}

use crate::services::gemini::{Content, GeminiError, GenerativeModel, Part};
use crate::utils::auth::Claims;
use bytes::Bytes;
use futures::{Stream, StreamExt, future};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, error, info_span};

const RELAY_BUFFER: usize = 32;

/// What the producer task hands to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Chunk(String),
    /// In-band error; always the last event of a stream.
    Failed(String),
    Done,
}

impl RelayEvent {
    fn into_bytes(self) -> Option<Bytes> {
        match self {
            RelayEvent::Chunk(text) => Some(Bytes::from(text)),
            RelayEvent::Failed(cause) => Some(Bytes::from(format!("Error: {}", cause))),
            RelayEvent::Done => None,
        }
    }
}

/// A single question, optionally about a previously uploaded file.
#[derive(Debug, Clone, Default)]
pub struct Question {
    pub text: String,
    pub file_uri: Option<String>,
    pub mime_type: Option<String>,
}

/// One user turn: the file reference first (if any), then the question.
pub fn build_contents(question: &Question) -> Vec<Content> {
    let mut parts = Vec::with_capacity(2);
    if let Some(file_uri) = question.file_uri.as_deref().filter(|u| !u.is_empty()) {
        parts.push(Part::FileData {
            mime_type: question.mime_type.clone().filter(|m| !m.is_empty()),
            file_uri: file_uri.to_string(),
        });
    }
    parts.push(Part::Text(question.text.clone()));
    vec![Content::user(parts)]
}

pub struct StreamingRelay {
    model: Arc<dyn GenerativeModel>,
    idle_timeout: Duration,
}

impl StreamingRelay {
    pub fn new(model: Arc<dyn GenerativeModel>, idle_timeout: Duration) -> Self {
        Self {
            model,
            idle_timeout,
        }
    }

    /// Starts answering `question` and returns the event stream.
    ///
    /// The answer is produced by a background task; dropping the returned
    /// stream stops it and releases the in-flight model call.
    pub fn ask(&self, question: Question, claims: &Claims) -> ReceiverStream<RelayEvent> {
        let (tx, rx) = mpsc::channel(RELAY_BUFFER);
        let contents = build_contents(&question);
        let model = self.model.clone();
        let idle_timeout = self.idle_timeout;
        let span = info_span!(
            "ask",
            uid = %claims.uid(),
            with_file = question.file_uri.is_some()
        );

        tokio::spawn(produce(model, contents, idle_timeout, tx).instrument(span));
        ReceiverStream::new(rx)
    }
}

async fn produce(
    model: Arc<dyn GenerativeModel>,
    contents: Vec<Content>,
    idle_timeout: Duration,
    tx: mpsc::Sender<RelayEvent>,
) {
    let outcome = tokio::select! {
        _ = tx.closed() => {
            debug!("Client went away, abandoning model stream");
            return;
        }
        outcome = forward(model.as_ref(), contents, idle_timeout, &tx) => outcome,
    };

    let terminal = match outcome {
        Ok(()) => RelayEvent::Done,
        Err(e) => {
            error!("❌ AI stream error: {}", e);
            RelayEvent::Failed(e.to_string())
        }
    };
    let _ = tx.send(terminal).await;
}

async fn forward(
    model: &dyn GenerativeModel,
    contents: Vec<Content>,
    idle_timeout: Duration,
    tx: &mpsc::Sender<RelayEvent>,
) -> Result<(), GeminiError> {
    let mut stream = model.stream_generate(contents).await?;
    let mut fragments = 0usize;

    loop {
        let next = tokio::time::timeout(idle_timeout, stream.next())
            .await
            .map_err(|_| GeminiError::Timeout(idle_timeout))?;

        match next {
            None => {
                debug!("Model finished after {} fragments", fragments);
                return Ok(());
            }
            Some(Err(e)) => return Err(e),
            Some(Ok(text)) if text.is_empty() => continue,
            Some(Ok(text)) => {
                fragments += 1;
                if tx.send(RelayEvent::Chunk(text)).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// Body stream for the transport: text until `Done`, or up to and
/// including the in-band error.
pub fn into_body_stream<S>(events: S) -> impl Stream<Item = Result<Bytes, Infallible>> + Send
where
    S: Stream<Item = RelayEvent> + Send,
{
    events
        .take_while(|event| future::ready(*event != RelayEvent::Done))
        .filter_map(|event| future::ready(event.into_bytes().map(Ok)))
}

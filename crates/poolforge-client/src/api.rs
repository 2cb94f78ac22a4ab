//! Job API client
//!
//! `JobApi` is the orchestrator's view of the server. `HttpJobApi` speaks the
//! server's HTTP surface and reads subscriptions from its Server-Sent Events
//! stream.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use poolforge_core::{CreateJobResponse, DeployRequest, JobSnapshot, ResourceParams, SubscriptionEvent};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Operations the orchestrator needs from the job API
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn create_job(&self, request: DeployRequest) -> Result<CreateJobResponse>;

    /// `ClientError::NotFound` for an unknown id
    async fn status_job(&self, id: &str) -> Result<JobSnapshot>;

    /// Terminal events for a job; dropping the stream unsubscribes
    async fn subscribe_job(&self, id: &str) -> Result<BoxStream<'static, Result<SubscriptionEvent>>>;

    async fn confirm_job(&self, id: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct ConfirmBody {
    message: String,
}

/// `JobApi` over HTTP
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Pass successful responses through; turn the rest into errors
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    if status == StatusCode::NOT_FOUND {
        Err(ClientError::NotFound(message))
    } else {
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn create_job(&self, request: DeployRequest) -> Result<CreateJobResponse> {
        let (path, body) = match &request.params {
            ResourceParams::Pool { token_a, token_b } => (
                "/v1/pools",
                json!({
                    "jobId": request.job_id,
                    "requester": request.requester,
                    "network": request.network,
                    "tokenA": token_a,
                    "tokenB": token_b,
                }),
            ),
            ResourceParams::Factory {} => (
                "/v1/factories",
                json!({
                    "jobId": request.job_id,
                    "requester": request.requester,
                    "network": request.network,
                }),
            ),
        };

        let response = self.client.post(self.url(path)).json(&body).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn status_job(&self, id: &str) -> Result<JobSnapshot> {
        let response = self
            .client
            .get(self.url(&format!("/v1/jobs/{}", id)))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn subscribe_job(&self, id: &str) -> Result<BoxStream<'static, Result<SubscriptionEvent>>> {
        let response = self
            .client
            .get(self.url(&format!("/v1/jobs/{}/events", id)))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check(response).await?;
        debug!(job_id = %id, "Subscribed to job events");

        let state = SseState {
            chunks: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            buffer: Vec::new(),
            after_cr: false,
        };
        Ok(stream::unfold(state, next_event).boxed())
    }

    async fn confirm_job(&self, id: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url(&format!("/v1/jobs/{}/confirm", id)))
            .send()
            .await?;
        let body: ConfirmBody = check(response).await?.json().await?;
        Ok(body.message)
    }
}

// =============================================================================
// Server-Sent Events
// =============================================================================

struct SseState {
    chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    /// Frame bytes with every line ending already turned into `\n`
    buffer: Vec<u8>,
    /// The last byte received was `\r`, so a leading `\n` is its CRLF tail
    after_cr: bool,
}

async fn next_event(mut state: SseState) -> Option<(Result<SubscriptionEvent>, SseState)> {
    loop {
        while let Some(frame) = take_frame(&mut state.buffer) {
            if let Some(data) = frame_data(&frame) {
                let event = serde_json::from_str(&data).map_err(ClientError::from);
                return Some((event, state));
            }
        }

        match state.chunks.next().await {
            Some(Ok(chunk)) => push_normalized(&mut state.buffer, &mut state.after_cr, &chunk),
            Some(Err(e)) => return Some((Err(ClientError::Stream(e.to_string())), state)),
            None => return None,
        }
    }
}

/// Append `chunk` with CRLF and bare CR line endings rewritten to LF.
///
/// `after_cr` carries a CR at the end of one chunk over to the next, so a
/// CRLF split across chunks still counts as one line ending.
fn push_normalized(buffer: &mut Vec<u8>, after_cr: &mut bool, chunk: &[u8]) {
    for &byte in chunk {
        match byte {
            b'\n' if *after_cr => {}
            b'\r' => buffer.push(b'\n'),
            _ => buffer.push(byte),
        }
        *after_cr = byte == b'\r';
    }
}

/// Remove and return the first complete frame from a normalized `buffer`
fn take_frame(buffer: &mut Vec<u8>) -> Option<String> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let frame = String::from_utf8_lossy(&buffer[..end]).into_owned();
    buffer.drain(..end + 2);
    Some(frame)
}

/// Joined `data:` lines of a frame; `None` for comments and keep-alives.
///
/// `event:`, `id:` and `retry:` fields are ignored. The payload carries its
/// own type and subscriptions are never resumed, callers poll status instead.
fn frame_data(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_frame_waits_for_blank_line() {
        let mut buffer = b"event: completed\ndata: {}".to_vec();
        assert!(take_frame(&mut buffer).is_none());

        buffer.extend_from_slice(b"\n\n: keep-alive\n\n");
        assert_eq!(take_frame(&mut buffer).unwrap(), "event: completed\ndata: {}");
        assert_eq!(take_frame(&mut buffer).unwrap(), ": keep-alive");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_frame_data() {
        assert_eq!(frame_data("event: failed\ndata: {\"a\":1}").unwrap(), "{\"a\":1}");
        assert_eq!(frame_data("data:x\ndata: y").unwrap(), "x\ny");
        assert!(frame_data(":").is_none());
    }

    /// Feed `chunks` through normalization and collect every frame's data
    fn frames(chunks: &[&[u8]]) -> Vec<String> {
        let mut buffer = Vec::new();
        let mut after_cr = false;
        let mut data = Vec::new();
        for chunk in chunks {
            push_normalized(&mut buffer, &mut after_cr, chunk);
            while let Some(frame) = take_frame(&mut buffer) {
                data.extend(frame_data(&frame));
            }
        }
        data
    }

    #[test]
    fn test_crlf_frames() {
        let data = frames(&[b"data: {\"type\":\"notFound\",\"jobId\":\"j\"}\r\n\r\n"]);
        let event: SubscriptionEvent = serde_json::from_str(&data[0]).unwrap();
        assert_eq!(event, SubscriptionEvent::NotFound { job_id: "j".into() });
    }

    #[test]
    fn test_bare_cr_frames() {
        assert_eq!(
            frames(&[b": keep-alive\r\rretry: 1000\rdata: a\rdata: b\r\r"]),
            vec!["a\nb".to_string()]
        );
    }

    #[test]
    fn test_line_endings_split_across_chunks() {
        // CRLF split between chunks is one line ending, not two
        assert!(frames(&[b"data: a\r", b"\ndata: b\r\n"]).is_empty());
        assert_eq!(
            frames(&[b"data: a\r", b"\ndata: b\r\n", b"\r", b"\n"]),
            vec!["a\nb".to_string()]
        );
        // Mixed endings in one stream
        assert_eq!(
            frames(&[b"data: x\n\n", b"data: y\r", b"\r", b"data: z\r\n\r\n"]),
            vec!["x".to_string(), "y".to_string(), "z".to_string()]
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let api = HttpJobApi::with_client(reqwest::Client::new(), "http://localhost:8080/");
        assert_eq!(api.url("/v1/pools"), "http://localhost:8080/v1/pools");
    }
}

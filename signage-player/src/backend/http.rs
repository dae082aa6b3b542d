//! HTTP/WebSocket implementation of the backend contract.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{BackendApi, HeartbeatReply};
use crate::domain::{Command, CommandOutcome, ContentSnapshot, TelemetryEvent};
use crate::{Error, Result};

/// Channel capacity for pushed commands.
const PUSH_BUFFER: usize = 32;

/// Reqwest-backed backend client.
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    version: &'a str,
}

#[derive(Serialize)]
struct ResultBody<'a> {
    success: bool,
    detail: Option<&'a str>,
}

impl HttpBackend {
    pub fn new(base: Url, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Configuration(format!("invalid endpoint {path}: {e}")))
    }

    /// WebSocket endpoint derived from the HTTP base URL.
    fn ws_endpoint(&self, path: &str) -> Result<Url> {
        let mut url = self.endpoint(path)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::Configuration("cannot derive websocket scheme".into()))?;
        Ok(url)
    }

    /// Map non-success statuses to `Error::BackendStatus` so the retry
    /// classifier can tell 5xx/429 from permanent client errors.
    async fn checked(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let detail = resp.text().await.unwrap_or_default();
        let detail = detail.chars().take(200).collect();
        Err(Error::BackendStatus {
            status: status.as_u16(),
            detail,
        })
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn fetch_snapshot(&self, device_id: &str) -> Result<ContentSnapshot> {
        let url = self.endpoint(&format!("api/devices/{device_id}/snapshot"))?;
        let resp = Self::checked(self.client.get(url).send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn fetch_media(&self, url: &str) -> Result<Bytes> {
        let resp = Self::checked(self.client.get(url).send().await?).await?;
        Ok(resp.bytes().await?)
    }

    async fn report_status(&self, device_id: &str, version: &str) -> Result<HeartbeatReply> {
        let url = self.endpoint(&format!("api/devices/{device_id}/heartbeat"))?;
        let resp = self
            .client
            .post(url)
            .json(&StatusBody { version })
            .send()
            .await?;
        Ok(Self::checked(resp).await?.json().await?)
    }

    async fn poll_commands(&self, device_id: &str) -> Result<Vec<Command>> {
        let url = self.endpoint(&format!("api/devices/{device_id}/commands"))?;
        let resp = Self::checked(self.client.get(url).send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn subscribe_commands(
        &self,
        device_id: &str,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<Command>> {
        let url = self.ws_endpoint(&format!("api/devices/{device_id}/commands/ws"))?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Push(e.to_string()))?;
        info!(device_id, "command push channel connected");

        let (tx, rx) = mpsc::channel(PUSH_BUFFER);
        tokio::spawn(async move {
            let (mut sink, mut source) = stream.split();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    msg = source.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<Command>(text.as_str()) {
                                    Ok(command) => {
                                        if tx.send(command).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!(error = %e, "undecodable push command, ignoring");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = sink.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("command push channel closed by backend");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(error = %e, "command push channel error");
                                break;
                            }
                        }
                    }
                }
            }
            // Dropping `tx` closes the receiver, signalling the command
            // channel to resubscribe.
        });
        Ok(rx)
    }

    async fn report_command_result(&self, outcome: &CommandOutcome) -> Result<()> {
        let url = self.endpoint(&format!("api/commands/{}/result", outcome.command_id))?;
        let resp = self
            .client
            .post(url)
            .json(&ResultBody {
                success: outcome.success,
                detail: outcome.detail.as_deref(),
            })
            .send()
            .await?;
        Self::checked(resp).await?;
        Ok(())
    }

    async fn report_events(&self, device_id: &str, events: &[TelemetryEvent]) -> Result<()> {
        let url = self.endpoint(&format!("api/devices/{device_id}/events"))?;
        let resp = self.client.post(url).json(events).send().await?;
        Self::checked(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_endpoint_derivation() {
        let backend = HttpBackend::new(
            Url::parse("https://signage.example/").unwrap(),
            Duration::from_secs(10),
        )
        .unwrap();
        let ws = backend.ws_endpoint("api/devices/d-1/commands/ws").unwrap();
        assert_eq!(ws.scheme(), "wss");
        assert_eq!(ws.path(), "/api/devices/d-1/commands/ws");

        let plain = HttpBackend::new(
            Url::parse("http://localhost:8080/").unwrap(),
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(
            plain
                .ws_endpoint("api/devices/d-1/commands/ws")
                .unwrap()
                .scheme(),
            "ws"
        );
    }
}

//! HTTP transport over reqwest

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, trace, warn};

use crate::{Method, Result, Transport, TransportError, TransportRequest, TransportResponse};

/// reqwest-backed transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn classify(err: reqwest::Error, request: &TransportRequest) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(request.timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        trace!("◆ UPLINK {:?} {}", request.method, request.url);

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        builder = builder.timeout(request.timeout);

        if let Some(token) = &request.bearer_token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify(e, &request))?;

        // Past the status line the exchange is complete; a broken body reads as empty
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("◆ UNREADABLE RESPONSE BODY (HTTP {}): {}", status, e);
                String::new()
            }
        };

        debug!("◆ UPLINK RESPONSE: HTTP {} ({} bytes)", status, body.len());

        Ok(TransportResponse { status, body })
    }
}

//! Kernel gateway REST client.
//!
//! [`KernelGateway`] is the seam the proxy and the registry depend on;
//! [`RestKernelGateway`] is the production implementation over
//! `reqwest`. Calls are not retried: a failure is reported to the caller,
//! which decides whether to log it or surface it.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use sage_domain::error::{Error, Result};
use sage_domain::trace::TraceEvent;
use sage_protocol::{CreateKernelRequest, KernelModel, KernelSpecs};
use serde::de::DeserializeOwned;

/// Where to open a kernel's channels socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelsEndpoint {
    pub url: String,
    pub token: Option<String>,
}

/// Abstraction over the kernel gateway's REST surface.
#[async_trait]
pub trait KernelGateway: Send + Sync {
    /// Live kernels (GET /api/kernels).
    async fn list_kernels(&self) -> Result<Vec<KernelModel>>;

    /// Start a kernel of the given spec (POST /api/kernels).
    async fn create_kernel(&self, kernel_name: &str) -> Result<KernelModel>;

    /// Shut a kernel down (DELETE /api/kernels/{id}).
    async fn delete_kernel(&self, kernel_id: &str) -> Result<()>;

    /// Restart a kernel (POST /api/kernels/{id}/restart).
    async fn restart_kernel(&self, kernel_id: &str) -> Result<KernelModel>;

    /// Abort the running cell (POST /api/kernels/{id}/interrupt).
    async fn interrupt_kernel(&self, kernel_id: &str) -> Result<()>;

    /// Installed kernel specs (GET /api/kernelspecs).
    async fn kernelspecs(&self) -> Result<KernelSpecs>;

    /// WebSocket endpoint for `/api/kernels/{id}/channels`.
    fn channels_endpoint(&self, kernel_id: &str, session_id: &str) -> ChannelsEndpoint;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// REST client for a Jupyter kernel gateway.
///
/// Created once per process; the inner `reqwest::Client` pools connections.
#[derive(Debug, Clone)]
pub struct RestKernelGateway {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl RestKernelGateway {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ── request helpers ──────────────────────────────────────────────

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => rb.header("Authorization", format!("Token {token}")),
            None => rb,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and require one of the `expected` statuses.
    async fn call(
        &self,
        endpoint: &str,
        rb: RequestBuilder,
        expected: &[StatusCode],
    ) -> Result<Response> {
        let start = Instant::now();
        let result = self.decorate(rb).send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                TraceEvent::GatewayCall {
                    endpoint: endpoint.to_owned(),
                    status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                    duration_ms,
                }
                .emit();
                return Err(from_reqwest(e));
            }
        };

        let status = resp.status();
        TraceEvent::GatewayCall {
            endpoint: endpoint.to_owned(),
            status: status.as_u16(),
            duration_ms,
        }
        .emit();

        if expected.contains(&status) {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Auth(format!("{endpoint} rejected token ({status}): {body}")));
        }
        Err(Error::Gateway {
            endpoint: endpoint.to_owned(),
            status: status.as_u16(),
            message: body,
        })
    }

    async fn parse<T: DeserializeOwned>(endpoint: &str, resp: Response) -> Result<T> {
        let body = resp.text().await.map_err(from_reqwest)?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Protocol(format!("{endpoint}: unexpected response: {e}: {body}")))
    }
}

#[async_trait]
impl KernelGateway for RestKernelGateway {
    async fn list_kernels(&self) -> Result<Vec<KernelModel>> {
        let endpoint = "GET /api/kernels";
        let resp = self
            .call(endpoint, self.http.get(self.url("/api/kernels")), &[StatusCode::OK])
            .await?;
        Self::parse(endpoint, resp).await
    }

    async fn create_kernel(&self, kernel_name: &str) -> Result<KernelModel> {
        let endpoint = "POST /api/kernels";
        let body = CreateKernelRequest {
            name: kernel_name.to_owned(),
        };
        let resp = self
            .call(
                endpoint,
                self.http.post(self.url("/api/kernels")).json(&body),
                &[StatusCode::CREATED, StatusCode::OK],
            )
            .await?;
        Self::parse(endpoint, resp).await
    }

    async fn delete_kernel(&self, kernel_id: &str) -> Result<()> {
        self.call(
            "DELETE /api/kernels/{id}",
            self.http.delete(self.url(&format!("/api/kernels/{kernel_id}"))),
            &[StatusCode::NO_CONTENT, StatusCode::OK],
        )
        .await?;
        Ok(())
    }

    async fn restart_kernel(&self, kernel_id: &str) -> Result<KernelModel> {
        let endpoint = "POST /api/kernels/{id}/restart";
        let resp = self
            .call(
                endpoint,
                self.http
                    .post(self.url(&format!("/api/kernels/{kernel_id}/restart"))),
                &[StatusCode::OK],
            )
            .await?;
        Self::parse(endpoint, resp).await
    }

    async fn interrupt_kernel(&self, kernel_id: &str) -> Result<()> {
        self.call(
            "POST /api/kernels/{id}/interrupt",
            self.http
                .post(self.url(&format!("/api/kernels/{kernel_id}/interrupt"))),
            &[StatusCode::NO_CONTENT],
        )
        .await?;
        Ok(())
    }

    async fn kernelspecs(&self) -> Result<KernelSpecs> {
        let endpoint = "GET /api/kernelspecs";
        let resp = self
            .call(endpoint, self.http.get(self.url("/api/kernelspecs")), &[StatusCode::OK])
            .await?;
        Self::parse(endpoint, resp).await
    }

    fn channels_endpoint(&self, kernel_id: &str, session_id: &str) -> ChannelsEndpoint {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        ChannelsEndpoint {
            url: format!("{ws_base}/api/kernels/{kernel_id}/channels?session_id={session_id}"),
            token: self.token.clone(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error conversion helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert a `reqwest::Error` into a domain `Error`.
///
/// Timeout errors become `Error::Timeout`; everything else becomes
/// `Error::Http`.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

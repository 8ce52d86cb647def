//! Relay of generation requests to the compute backend.
//!
//! The backend runs as several single-process workers, each bound to its own
//! port, and does not balance load itself. The relay tries the candidates
//! strictly in their configured order and returns the first success verbatim.
//!
//! ## Time budget
//!
//! Every relay attempt gets one budget (longer for compound categories) and
//! one [`CancellationToken`]. A timer task cancels the token when the budget
//! runs out; the token is never reset between candidates. Once it fires the
//! attempt stops, whatever candidate was in flight.
//!
//! ```text
//! candidate ok            → return payload
//! candidate non-2xx       → Upstream (stop)
//! connect/transport error → record, next candidate
//! token fired             → Timeout (stop)
//! list exhausted          → Unavailable (last error)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::{config::Config, models::GenerationRequest};

/// Bound on establishing a TCP connection to one candidate.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Bound on a single health probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a relay attempt produced no result.
#[derive(Debug, thiserror::Error)]
pub enum RelayFailure {
    #[error("relay budget of {budget:?} elapsed after trying {tried:?}")]
    Timeout { budget: Duration, tried: Vec<String> },
    #[error("no backend candidate reachable (tried {tried:?}): {last_error}")]
    Unavailable {
        last_error: String,
        tried: Vec<String>,
    },
    #[error("backend answered {status} (tried {tried:?})")]
    Upstream {
        status: StatusCode,
        tried: Vec<String>,
    },
}

impl RelayFailure {
    /// Candidates contacted, in order.
    pub fn tried(&self) -> &[String] {
        match self {
            RelayFailure::Timeout { tried, .. }
            | RelayFailure::Unavailable { tried, .. }
            | RelayFailure::Upstream { tried, .. } => tried,
        }
    }
}

/// The backend's answer, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl IntoResponse for GenerationResult {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::OK, self.body).into_response();
        if let Some(value) = self
            .content_type
            .and_then(|ct| HeaderValue::from_str(&ct).ok())
        {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        response
    }
}

/// Liveness of one candidate as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateStatus {
    /// Position in the failover order.
    pub index: usize,
    pub live: bool,
}

/// Relay of generation requests to a pool of backend candidates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendRelay: Send + Sync {
    /// Relay within the budget selected for this request.
    async fn relay(&self, request: &GenerationRequest) -> Result<GenerationResult, RelayFailure>;

    /// Actively probe every candidate's health path.
    async fn probe(&self) -> Vec<CandidateStatus>;

    /// Last observed liveness, without contacting anyone.
    fn statuses(&self) -> Vec<CandidateStatus>;
}

/// One backend worker endpoint.
#[derive(Debug)]
pub struct Candidate {
    address: String,
    last_known_live: AtomicBool,
}

impl Candidate {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            // Optimistic until observed otherwise
            last_known_live: AtomicBool::new(true),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_live(&self) -> bool {
        self.last_known_live.load(Ordering::Relaxed)
    }

    fn observe(&self, live: bool) {
        let was = self.last_known_live.swap(live, Ordering::Relaxed);
        if was != live {
            tracing::info!(candidate = %self.address, live, "backend candidate liveness changed");
        }
    }
}

/// Budgets per request kind.
#[derive(Debug, Clone, Copy)]
pub struct RelayBudgets {
    pub simple: Duration,
    pub complex: Duration,
}

impl RelayBudgets {
    pub fn for_request(&self, request: &GenerationRequest) -> Duration {
        if request.is_complex() {
            self.complex
        } else {
            self.simple
        }
    }
}

/// Bookkeeping for one relay attempt. Dropping it cancels the shared token,
/// which stops the budget timer and any call still racing against it.
struct RelayAttempt {
    id: Uuid,
    started: Instant,
    budget: Duration,
    token: CancellationToken,
    tried: Vec<String>,
    _cancel_on_drop: DropGuard,
}

impl RelayAttempt {
    fn start(budget: Duration, parent: &CancellationToken) -> Self {
        let token = parent.child_token();

        let timer = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(budget) => timer.cancel(),
                _ = timer.cancelled() => {}
            }
        });

        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            budget,
            _cancel_on_drop: token.clone().drop_guard(),
            token,
            tried: Vec::new(),
        }
    }

    /// Race `fut` against the shared token. None if the token fired first.
    async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            out = fut => Some(out),
        }
    }

    fn timed_out(self) -> RelayFailure {
        tracing::warn!(
            attempt = %self.id,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            tried = ?self.tried,
            "relay budget exhausted"
        );
        RelayFailure::Timeout {
            budget: self.budget,
            tried: self.tried,
        }
    }
}

/// How a single forward call ended, short of a timeout.
enum CallOutcome {
    Success(GenerationResult),
    Rejected(StatusCode),
    Unreachable(String),
}

/// HTTP implementation of BackendRelay.
pub struct HttpBackendRelay {
    http: reqwest::Client,
    candidates: Vec<Candidate>,
    budgets: RelayBudgets,
    shutdown: CancellationToken,
}

impl HttpBackendRelay {
    pub fn new(
        addresses: Vec<String>,
        budgets: RelayBudgets,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            candidates: addresses.into_iter().map(Candidate::new).collect(),
            budgets,
            shutdown,
        })
    }

    pub fn from_config(config: &Config, shutdown: CancellationToken) -> anyhow::Result<Self> {
        Self::new(
            config.backend_addresses(),
            RelayBudgets {
                simple: config.simple_budget(),
                complex: config.complex_budget(),
            },
            shutdown,
        )
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Relay `request`, giving the whole candidate sequence `budget` in total.
    pub async fn relay_within(
        &self,
        request: &GenerationRequest,
        budget: Duration,
    ) -> Result<GenerationResult, RelayFailure> {
        let mut attempt = RelayAttempt::start(budget, &self.shutdown);
        let mut last_error = None;

        tracing::debug!(attempt = %attempt.id, ?budget, complex = request.is_complex(), "relay started");

        for candidate in &self.candidates {
            if attempt.token.is_cancelled() {
                return Err(attempt.timed_out());
            }

            attempt.tried.push(candidate.address.clone());

            let Some(outcome) = attempt.run(self.forward(candidate, request)).await else {
                return Err(attempt.timed_out());
            };

            match outcome {
                CallOutcome::Success(result) => {
                    candidate.observe(true);
                    tracing::info!(
                        attempt = %attempt.id,
                        candidate = %candidate.address,
                        tried = attempt.tried.len(),
                        elapsed_ms = attempt.started.elapsed().as_millis() as u64,
                        "generation relayed"
                    );
                    return Ok(result);
                }
                CallOutcome::Rejected(status) => {
                    candidate.observe(true);
                    tracing::warn!(
                        attempt = %attempt.id,
                        candidate = %candidate.address,
                        %status,
                        "backend rejected generation"
                    );
                    return Err(RelayFailure::Upstream {
                        status,
                        tried: std::mem::take(&mut attempt.tried),
                    });
                }
                CallOutcome::Unreachable(error) => {
                    candidate.observe(false);
                    tracing::debug!(
                        attempt = %attempt.id,
                        candidate = %candidate.address,
                        "backend candidate unreachable: {}",
                        error
                    );
                    last_error = Some(error);
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| "no backend candidates configured".to_string());
        tracing::warn!(attempt = %attempt.id, tried = ?attempt.tried, "all backend candidates unreachable");

        Err(RelayFailure::Unavailable {
            last_error,
            tried: std::mem::take(&mut attempt.tried),
        })
    }

    async fn forward(&self, candidate: &Candidate, request: &GenerationRequest) -> CallOutcome {
        let url = format!("http://{}/generate", candidate.address);

        let response = match self.http.post(&url).json(request).send().await {
            Ok(response) => response,
            Err(e) => return CallOutcome::Unreachable(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return CallOutcome::Rejected(status);
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match response.bytes().await {
            Ok(body) => CallOutcome::Success(GenerationResult { content_type, body }),
            Err(e) => CallOutcome::Unreachable(format!("reading response body: {}", e)),
        }
    }

    async fn probe_one(&self, candidate: &Candidate) -> bool {
        let url = format!("http://{}/health", candidate.address);
        let live = matches!(
            self.http.get(&url).timeout(PROBE_TIMEOUT).send().await,
            Ok(response) if response.status().is_success()
        );
        candidate.observe(live);
        live
    }

    /// Probe every `interval` until shutdown.
    pub fn spawn_prober(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let statuses = self.probe().await;
                        let live = statuses.iter().filter(|s| s.live).count();
                        tracing::debug!(live, total = statuses.len(), "backend probe finished");
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BackendRelay for HttpBackendRelay {
    async fn relay(&self, request: &GenerationRequest) -> Result<GenerationResult, RelayFailure> {
        self.relay_within(request, self.budgets.for_request(request))
            .await
    }

    async fn probe(&self) -> Vec<CandidateStatus> {
        let results =
            futures::future::join_all(self.candidates.iter().map(|c| self.probe_one(c))).await;

        results
            .into_iter()
            .enumerate()
            .map(|(index, live)| CandidateStatus { index, live })
            .collect()
    }

    fn statuses(&self) -> Vec<CandidateStatus> {
        self.candidates
            .iter()
            .enumerate()
            .map(|(index, c)| CandidateStatus {
                index,
                live: c.is_live(),
            })
            .collect()
    }
}

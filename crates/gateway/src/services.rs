//! Domain services.
//!
//! Each service with an external side is abstracted behind a trait to
//! enable mocking in tests.
//!
//! ## Services
//!
//! - **relay** - Ordered failover of generation requests to backend workers
//! - **entitlement** - License key and master key verification
//! - **issuer** - License key minting after payment
//! - **limits** - Per-caller rate limit windows
//! - **email** - License key delivery via Resend (prod) or SMTP (dev)
//!
//! ## Usage in Handlers
//!
//! Services are accessed via `AppState`:
//!
//! ```ignore
//! async fn handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
//!     state.limits.check_generation(&identity).await?;
//!     let result = state.relay.relay(&request).await.map_err(AppError::Relay)?;
//! }
//! ```

mod email;
mod entitlement;
mod issuer;
mod limits;
mod relay;

pub use email::{EmailSender, EmailSenderImpl};
pub use entitlement::{EntitlementVerifier, RedemptionPolicy, Verdict};
pub use issuer::KeyIssuer;
pub use limits::{LimitScope, RateLimitPolicy};
pub use relay::{BackendRelay, CandidateStatus, HttpBackendRelay, RelayFailure};

#[cfg(test)]
pub use email::MockEmailSender;

#[cfg(test)]
pub use relay::{GenerationResult, MockBackendRelay};

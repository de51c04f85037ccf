//! # replay-guard
//!
//! SSRF-safe replay of captured HTTP requests.
//!
//! A user asks for a previously captured request to be sent again to a URL
//! of their choosing. [`TargetValidator`] decides whether that URL may be
//! reached at all: scheme, credentials and hostname checks, then DNS, then
//! every resolved address against private, loopback, link-local and other
//! internal ranges. [`ReplayExecutor`] then connects only to the address the
//! validator pinned, so a second DNS answer can never redirect the call.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use replay_guard::{CapturedRequest, ReplayExecutor, ReplayMethod, TargetValidator};
//!
//! # async fn example() -> Result<(), replay_guard::Error> {
//! let validated = TargetValidator::default()
//!     .validate("https://hooks.example.com/in")
//!     .await?;
//! let request = CapturedRequest::new("user-1", ReplayMethod::Post).with_body("{}");
//! let response = ReplayExecutor::default()
//!     .execute_validated(&request, &validated)
//!     .await?;
//! println!("{} from {}", response.status, validated.pinned);
//! # Ok(())
//! # }
//! ```

mod audit;
mod blocklist;
mod cidr;
mod error;
mod executor;
mod policy;
mod request;
mod resolver;
mod service;
mod store;
mod target_url;
mod validate;

#[cfg(feature = "server")]
pub mod config;
#[cfg(feature = "server")]
pub mod server;

pub use audit::{AuditEvent, AuditMetadata, AuditSink, NoopAuditSink, Outcome, TracingAuditSink};
pub use blocklist::{AddressRangeMatcher, BlockReason, BLOCKED_HOSTNAMES};
pub use cidr::Cidr;
pub use error::{Error, FailureKind};
pub use executor::{
    ReplayExecutor, ReplayResponse, DEFAULT_REPLAY_TIMEOUT, MAX_RESPONSE_BODY, STRIPPED_HEADERS,
    TRUNCATION_MARKER,
};
pub use policy::{Policy, PolicyBuilder};
pub use request::{CapturedHeaders, CapturedRequest, ReplayMethod};
pub use resolver::{
    DnsErrorClass, HickoryResolver, Resolve, ResolveFailure, ResolverKind, StaticResolver,
    SystemResolver,
};
pub use service::{Caller, ReplayError, ReplayService, REQUEST_NOT_FOUND, TARGET_NOT_ALLOWED};
pub use store::{InMemoryRequestStore, RequestStore};
pub use target_url::TargetUrl;
pub use validate::{TargetValidator, Validated, ValidationResult, DEFAULT_DNS_TIMEOUT};

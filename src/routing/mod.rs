//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request body
//!     → classifier.rs (model family → tier, feature flags)
//!     → router.rs (tier / feature / config checks, then breaker admission)
//!         ├─ primary:   original body, client credentials
//!         └─ secondary: translate.rs (model rewrite, field stripping)
//!                       → outcome recorded in the circuit breaker
//!                       → on failure: one retry against primary
//!     → RouteOutcome (decision + relayable response) or RouteError
//! ```
//!
//! # Design Decisions
//! - Classification is pure; the router holds no mutable state of its own
//! - Unknown models and malformed bodies fail open to the primary provider
//! - Deterministic: same classification and breaker state give the same decision

pub mod classifier;
pub mod router;
pub mod translate;

pub use classifier::{
    parse_payload, Classification, ClassificationError, Classifier, FeatureFlags, ModelFamily,
    ModelTier,
};
pub use router::{
    InboundRequest, RouteError, RouteOutcome, RouteReason, RouteTarget, Router, RoutingDecision,
    SecondaryRoute,
};

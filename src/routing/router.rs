//! Route selection and dispatch.
//!
//! # Responsibilities
//! - Combine classification and breaker state into a routing decision
//! - Forward to the chosen provider, translating for the secondary
//! - Feed every secondary outcome back into the circuit breaker
//! - Retry a failed secondary attempt once against the primary provider
//!
//! # Design Decisions
//! - Immutable after construction; the breaker is the only shared mutable state
//! - Tier and feature checks run before the breaker is consulted, so requests
//!   pinned to the primary never claim a half-open trial slot
//! - The breaker lock is never held across an upstream call; an [`Admission`]
//!   guard carries the permission instead
//! - A request always ends in exactly one relayed response or one error

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::config::ProxyConfig;
use crate::observability::metrics;
use crate::resilience::{with_deadline, Admission, CircuitBreaker};
use crate::routing::classifier::{parse_payload, Classification, ClassificationError, Classifier, ModelFamily, ModelTier};
use crate::routing::translate;
use crate::upstream::{build_client, Provider, UpstreamError, UpstreamResponse};

/// Upstream a request was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTarget {
    Primary,
    Secondary,
}

impl RouteTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteTarget::Primary => "primary",
            RouteTarget::Secondary => "secondary",
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a target was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteReason {
    /// The model tier decided (primary-only family, or eligible and admitted).
    Tier,
    /// A request feature the secondary cannot serve.
    FeatureFallback,
    /// The breaker refused the secondary attempt.
    BreakerOpen,
    /// No usable secondary provider is configured.
    Config,
    /// The secondary attempt failed and the request was retried on primary.
    SecondaryFailure,
    /// Endpoint served only by the primary provider.
    Passthrough,
}

impl RouteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteReason::Tier => "tier",
            RouteReason::FeatureFallback => "feature-fallback",
            RouteReason::BreakerOpen => "breaker-open",
            RouteReason::Config => "config",
            RouteReason::SecondaryFailure => "secondary-failure",
            RouteReason::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target and reason for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub target: RouteTarget,
    pub reason: RouteReason,
}

impl RoutingDecision {
    pub fn primary(reason: RouteReason) -> Self {
        Self {
            target: RouteTarget::Primary,
            reason,
        }
    }

    pub fn secondary(reason: RouteReason) -> Self {
        Self {
            target: RouteTarget::Secondary,
            reason,
        }
    }
}

/// A request as received from the client.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub request_id: String,
    /// Endpoint path, e.g. `/v1/messages`.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A response ready to relay, with the decision that produced it.
#[derive(Debug)]
pub struct RouteOutcome {
    pub decision: RoutingDecision,
    pub response: UpstreamResponse,
}

/// No provider produced a response.
#[derive(Debug)]
pub struct RouteError {
    pub decision: RoutingDecision,
    pub error: UpstreamError,
}

/// Secondary provider plus its routing settings.
#[derive(Debug)]
pub struct SecondaryRoute {
    provider: Provider,
    model: String,
    deadline: Duration,
    slots: Semaphore,
}

impl SecondaryRoute {
    pub fn new(provider: Provider, model: impl Into<String>, deadline: Duration, max_concurrent: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            deadline,
            slots: Semaphore::new(max_concurrent.max(1)),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Outcome of the pre-flight decision.
pub(crate) enum Plan<'a> {
    Primary(RouteReason),
    Secondary {
        route: &'a SecondaryRoute,
        admission: Admission<'a>,
    },
}

/// The routing engine.
#[derive(Debug)]
pub struct Router {
    classifier: Classifier,
    breaker: Arc<CircuitBreaker>,
    primary: Provider,
    secondary: Option<SecondaryRoute>,
    primary_deadline: Duration,
}

impl Router {
    pub fn new(
        classifier: Classifier,
        breaker: Arc<CircuitBreaker>,
        primary: Provider,
        secondary: Option<SecondaryRoute>,
        primary_deadline: Duration,
    ) -> Self {
        Self {
            classifier,
            breaker,
            primary,
            secondary,
            primary_deadline,
        }
    }

    /// Build providers and classifier from configuration.
    ///
    /// An unusable secondary provider is not an error: eligible requests
    /// go to primary with reason `config`.
    pub fn from_config(config: &ProxyConfig, breaker: Arc<CircuitBreaker>) -> Result<Self, UpstreamError> {
        let client = build_client(&config.timeouts)?;
        let primary = Provider::primary(&config.primary.base_url, client.clone())?;
        let secondary = Provider::secondary(&config.secondary, client).map(|provider| {
            SecondaryRoute::new(
                provider,
                config.secondary.model.clone(),
                config.secondary.attempt_timeout(),
                config.secondary.max_concurrent_requests,
            )
        });

        let classifier = Classifier::new(config.secondary.tiers.iter().copied());

        Ok(Self::new(
            classifier,
            breaker,
            primary,
            secondary,
            Duration::from_secs(config.timeouts.read_secs),
        ))
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Configured secondary model, when a secondary provider is usable.
    pub fn secondary_model(&self) -> Option<&str> {
        self.secondary.as_ref().map(SecondaryRoute::model)
    }

    /// Static target per known family, ignoring breaker state.
    pub fn routing_table(&self) -> BTreeMap<ModelFamily, RouteTarget> {
        ModelFamily::KNOWN
            .into_iter()
            .chain([ModelFamily::Other])
            .map(|family| {
                let target = match self.classifier.tier_of(family) {
                    ModelTier::SecondaryEligible if self.secondary.is_some() => RouteTarget::Secondary,
                    _ => RouteTarget::Primary,
                };
                (family, target)
            })
            .collect()
    }

    /// Pick a target. The breaker is consulted only for eligible requests
    /// without feature fallbacks.
    pub(crate) fn plan(&self, classification: &Classification) -> Plan<'_> {
        if classification.tier == ModelTier::Primary {
            return Plan::Primary(RouteReason::Tier);
        }
        if classification.features.any() {
            return Plan::Primary(RouteReason::FeatureFallback);
        }
        let Some(route) = self.secondary.as_ref() else {
            return Plan::Primary(RouteReason::Config);
        };
        match self.breaker.admit() {
            Some(admission) => Plan::Secondary { route, admission },
            None => Plan::Primary(RouteReason::BreakerOpen),
        }
    }

    /// Route a `/v1/messages` request.
    pub async fn route(&self, request: InboundRequest) -> Result<RouteOutcome, RouteError> {
        let started = Instant::now();
        let result = self.dispatch(&request).await;
        self.finish(&request, &result, started);
        result
    }

    /// Send a request straight to the primary provider.
    pub async fn forward(&self, request: InboundRequest) -> Result<RouteOutcome, RouteError> {
        let started = Instant::now();
        let result = self.via_primary(&request, RouteReason::Passthrough, false).await;
        self.finish(&request, &result, started);
        result
    }

    async fn dispatch(&self, request: &InboundRequest) -> Result<RouteOutcome, RouteError> {
        let classified = parse_payload(&request.body).and_then(|payload| {
            let classification = self.classifier.classify(&payload)?;
            Ok::<_, ClassificationError>((payload, classification))
        });
        let (payload, classification) = match classified {
            Ok(classified) => classified,
            Err(e) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    error = %e,
                    "Unclassifiable request, forwarding to primary"
                );
                return self.via_primary(request, RouteReason::Tier, false).await;
            }
        };

        tracing::debug!(
            request_id = %request.request_id,
            model = %classification.model,
            family = %classification.family,
            feature = classification.features.first().unwrap_or("none"),
            stream = classification.stream,
            "Request classified"
        );

        match self.plan(&classification) {
            Plan::Primary(reason) => self.via_primary(request, reason, classification.stream).await,
            Plan::Secondary { route, admission } => {
                self.via_secondary(request, payload, &classification, route, admission)
                    .await
            }
        }
    }

    async fn via_primary(
        &self,
        request: &InboundRequest,
        reason: RouteReason,
        stream: bool,
    ) -> Result<RouteOutcome, RouteError> {
        let decision = RoutingDecision::primary(reason);
        let headers = self.primary.request_headers(&request.headers, stream);
        let call = self.primary.send(&request.path, headers, request.body.clone());
        match with_deadline(self.primary_deadline, call).await {
            Ok(response) => Ok(RouteOutcome { decision, response }),
            Err(error) => Err(RouteError { decision, error }),
        }
    }

    async fn via_secondary(
        &self,
        request: &InboundRequest,
        payload: Value,
        classification: &Classification,
        route: &SecondaryRoute,
        admission: Admission<'_>,
    ) -> Result<RouteOutcome, RouteError> {
        let (translated, removed) = translate::for_secondary(payload, &route.model);
        if !removed.is_empty() {
            tracing::debug!(
                request_id = %request.request_id,
                fields = ?removed,
                "Removed fields unsupported by secondary provider"
            );
        }
        let body = Bytes::from(translated.to_string());
        let headers = route.provider.request_headers(&request.headers, classification.stream);

        // Waiting for a slot does not count against the attempt deadline.
        let slot = route.slots.acquire().await.ok();
        tracing::debug!(
            request_id = %request.request_id,
            trial = admission.is_trial(),
            "Sending to secondary provider"
        );
        let attempt = with_deadline(route.deadline, route.provider.send(&request.path, headers, body)).await;
        drop(slot);

        let failure = match attempt {
            Ok(response) if !response.is_server_fault() => {
                admission.record(true);
                return Ok(RouteOutcome {
                    decision: RoutingDecision::secondary(RouteReason::Tier),
                    response,
                });
            }
            Ok(response) => {
                admission.record(false);
                UpstreamError::Server(response)
            }
            Err(error) => {
                admission.record(false);
                error
            }
        };

        let preview = match &failure {
            UpstreamError::Server(response) => response.preview(200),
            _ => String::new(),
        };
        tracing::warn!(
            request_id = %request.request_id,
            model = %classification.model,
            kind = failure.kind(),
            error = %failure,
            body = %preview,
            "Secondary provider failed, retrying on primary"
        );
        metrics::record_fallback();

        match self
            .via_primary(request, RouteReason::SecondaryFailure, classification.stream)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(primary_error) => {
                tracing::error!(
                    request_id = %request.request_id,
                    error = %primary_error.error,
                    "Primary provider also failed"
                );
                match failure {
                    UpstreamError::Server(response) => Ok(RouteOutcome {
                        decision: RoutingDecision::secondary(RouteReason::SecondaryFailure),
                        response,
                    }),
                    _ => Err(primary_error),
                }
            }
        }
    }

    fn finish(&self, request: &InboundRequest, result: &Result<RouteOutcome, RouteError>, started: Instant) {
        let (decision, status) = match result {
            Ok(outcome) => (outcome.decision, outcome.response.status),
            Err(e) => (e.decision, e.error.status_code()),
        };
        let elapsed = started.elapsed();

        tracing::info!(
            request_id = %request.request_id,
            path = %request.path,
            target = %decision.target,
            reason = %decision.reason,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Request routed"
        );
        metrics::record_request(decision.target, decision.reason, status.as_u16(), elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::classifier::FeatureFlags;
    use proptest::prelude::*;

    fn config_with_key() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.primary.base_url = "http://127.0.0.1:9".into();
        config.secondary.base_url = "http://127.0.0.1:9".into();
        config.secondary.api_key = Some("sk-test".into());
        config
    }

    fn router(config: &ProxyConfig) -> Router {
        let breaker = Arc::new(CircuitBreaker::from_config(&config.circuit_breaker));
        Router::from_config(config, breaker).unwrap()
    }

    fn classification(router: &Router, family: ModelFamily, features: FeatureFlags) -> Classification {
        Classification {
            model: family.to_string(),
            family,
            tier: router.classifier.tier_of(family),
            features,
            stream: false,
        }
    }

    fn planned(plan: Plan<'_>) -> RoutingDecision {
        match plan {
            Plan::Primary(reason) => RoutingDecision::primary(reason),
            Plan::Secondary { .. } => RoutingDecision::secondary(RouteReason::Tier),
        }
    }

    #[test]
    fn test_opus_is_pinned_to_primary() {
        let router = router(&config_with_key());
        let c = classification(&router, ModelFamily::Opus, FeatureFlags::default());
        assert_eq!(planned(router.plan(&c)), RoutingDecision::primary(RouteReason::Tier));
    }

    #[test]
    fn test_eligible_request_goes_secondary() {
        let router = router(&config_with_key());
        let c = classification(&router, ModelFamily::Haiku, FeatureFlags::default());
        assert_eq!(planned(router.plan(&c)), RoutingDecision::secondary(RouteReason::Tier));
    }

    #[test]
    fn test_missing_key_routes_everything_to_primary() {
        let mut config = config_with_key();
        config.secondary.api_key = None;
        let router = router(&config);

        assert_eq!(router.secondary_model(), None);
        assert!(router
            .routing_table()
            .values()
            .all(|target| *target == RouteTarget::Primary));

        let c = classification(&router, ModelFamily::Haiku, FeatureFlags::default());
        assert_eq!(c.tier, ModelTier::SecondaryEligible);
        assert_eq!(planned(router.plan(&c)), RoutingDecision::primary(RouteReason::Config));

        let opus = classification(&router, ModelFamily::Opus, FeatureFlags::default());
        assert_eq!(planned(router.plan(&opus)), RoutingDecision::primary(RouteReason::Tier));
    }

    #[test]
    fn test_routing_table() {
        let router = router(&config_with_key());
        let table = router.routing_table();
        assert_eq!(table[&ModelFamily::Opus], RouteTarget::Primary);
        assert_eq!(table[&ModelFamily::Sonnet], RouteTarget::Secondary);
        assert_eq!(table[&ModelFamily::Haiku], RouteTarget::Secondary);
        assert_eq!(table[&ModelFamily::Other], RouteTarget::Primary);
        assert_eq!(router.secondary_model(), Some("glm-5"));
    }

    #[test]
    fn test_open_breaker_diverts_to_primary() {
        let router = router(&config_with_key());
        for _ in 0..5 {
            router.breaker().record_outcome(false);
        }
        let c = classification(&router, ModelFamily::Sonnet, FeatureFlags::default());
        assert_eq!(
            planned(router.plan(&c)),
            RoutingDecision::primary(RouteReason::BreakerOpen)
        );
    }

    fn family_strategy() -> impl Strategy<Value = ModelFamily> {
        prop_oneof![
            Just(ModelFamily::Opus),
            Just(ModelFamily::Sonnet),
            Just(ModelFamily::Haiku),
            Just(ModelFamily::Other),
        ]
    }

    proptest! {
        #[test]
        fn prop_pinned_requests_never_touch_breaker(
            family in family_strategy(),
            uses_web_search in any::<bool>(),
            uses_vision in any::<bool>(),
            forced_tool_choice in any::<bool>(),
            failures in 0u32..10,
        ) {
            let router = router(&config_with_key());
            for _ in 0..failures {
                router.breaker().record_outcome(false);
            }
            let features = FeatureFlags { uses_web_search, uses_vision, forced_tool_choice };
            let c = classification(&router, family, features);
            let before = router.breaker().view();

            let decision = planned(router.plan(&c));

            if c.tier == ModelTier::Primary {
                prop_assert_eq!(decision, RoutingDecision::primary(RouteReason::Tier));
                prop_assert_eq!(router.breaker().view(), before);
            } else if features.any() {
                prop_assert_eq!(decision, RoutingDecision::primary(RouteReason::FeatureFallback));
                prop_assert_eq!(router.breaker().view(), before);
            } else if failures >= 5 {
                prop_assert_eq!(decision, RoutingDecision::primary(RouteReason::BreakerOpen));
            } else {
                prop_assert_eq!(decision, RoutingDecision::secondary(RouteReason::Tier));
            }
        }
    }
}

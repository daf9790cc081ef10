//! Phase runner (component C6).
//!
//! Drains a provider's event stream for a single node attempt, invoking
//! an `on_event` hook before yielding control to the caller so the
//! diagnostics recorder sees every event as it arrives, aggregating
//! usage, and extracting the routing decision from the terminal `result`
//! event.

use alphred_core::{ProviderError, ProviderEvent, ProviderEventType};
use futures_util::StreamExt;
use serde_json::Value;
use thiserror::Error;

use crate::provider::EventStream;

#[derive(Debug, Error)]
#[error("phase run failed after {} events ({:?} tokens used): {}", .events.len(), .tokens_used, .cause)]
pub struct PhaseRunError {
    pub events: Vec<ProviderEvent>,
    pub tokens_used: Option<i64>,
    pub cause: ProviderError,
}

/// Extraction source for the terminal routing decision, mirroring
/// `alphred_core::RoutingDecisionSource`'s wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecisionSource {
    ProviderResultMetadata,
    ResultContentContractFallback,
}

/// Everything extracted from a completed phase run, handed to the
/// executor to persist as a `PhaseArtifact`/`RoutingDecision` pair.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub events: Vec<ProviderEvent>,
    pub tokens_used: Option<i64>,
    pub result_content: Value,
    pub routing_decision: Option<String>,
    pub routing_decision_source: Option<RoutingDecisionSource>,
}

/// Drains `stream` to completion, invoking `on_event` for every event
/// before it is buffered. Returns the aggregated outcome on a well-formed
/// `result` event, or a `PhaseRunError` on any adapter error or a missing
/// terminal event.
pub async fn run_phase<F>(mut stream: EventStream, mut on_event: F) -> Result<PhaseOutcome, PhaseRunError>
where
    F: FnMut(&ProviderEvent),
{
    let mut events = Vec::new();
    let mut incremental_sum: i64 = 0;
    let mut cumulative_max: i64 = 0;
    let mut saw_incremental = false;
    let mut saw_cumulative = false;
    let mut result: Option<ProviderEvent> = None;

    loop {
        let next = stream.next().await;
        match next {
            Some(Ok(event)) => {
                on_event(&event);

                if let Some((delta, cumulative)) = extract_usage(&event.content) {
                    if let Some(delta) = delta {
                        incremental_sum += delta;
                        saw_incremental = true;
                    }
                    if let Some(cumulative) = cumulative {
                        cumulative_max = cumulative_max.max(cumulative);
                        saw_cumulative = true;
                    }
                }

                let is_result = event.event_type == ProviderEventType::Result;
                events.push(event);
                if is_result {
                    result = events.last().cloned();
                    break;
                }
            }
            Some(Err(cause)) => {
                return Err(PhaseRunError {
                    events,
                    tokens_used: reported_usage(saw_incremental, incremental_sum, saw_cumulative, cumulative_max),
                    cause,
                });
            }
            None => break,
        }
    }

    let Some(result_event) = result else {
        return Err(PhaseRunError {
            tokens_used: reported_usage(saw_incremental, incremental_sum, saw_cumulative, cumulative_max),
            events,
            cause: ProviderError::MissingResult,
        });
    };

    let (routing_decision, routing_decision_source) = extract_routing_decision(&result_event);

    Ok(PhaseOutcome {
        events,
        tokens_used: reported_usage(saw_incremental, incremental_sum, saw_cumulative, cumulative_max),
        result_content: result_event.content.clone(),
        routing_decision,
        routing_decision_source,
    })
}

fn reported_usage(
    saw_incremental: bool,
    incremental_sum: i64,
    saw_cumulative: bool,
    cumulative_max: i64,
) -> Option<i64> {
    match (saw_incremental, saw_cumulative) {
        (false, false) => None,
        (true, false) => Some(incremental_sum),
        (false, true) => Some(cumulative_max),
        (true, true) => Some(incremental_sum.max(cumulative_max)),
    }
}

/// Extracts `(incremental_tokens, cumulative_total_tokens)` from a usage
/// event's content, per the normalization rule: `input_tokens +
/// output_tokens ⇒ total_tokens`, preserving any larger explicit
/// `total_tokens`/`tokensUsed`/nested `usage.*` cumulative figure.
fn extract_usage(content: &Value) -> Option<(Option<i64>, Option<i64>)> {
    let usage = content.get("usage").unwrap_or(content);

    let input = as_i64(usage.get("input_tokens"));
    let output = as_i64(usage.get("output_tokens"));
    let incremental = match (input, output) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    };

    let cumulative = as_i64(usage.get("total_tokens"))
        .or_else(|| as_i64(content.get("tokensUsed")))
        .or_else(|| as_i64(content.get("total_tokens")));

    if incremental.is_none() && cumulative.is_none() {
        None
    } else {
        Some((incremental, cumulative))
    }
}

fn as_i64(value: Option<&Value>) -> Option<i64> {
    value.and_then(|v| v.as_i64())
}

/// Extracts `metadata.routingDecision` and `metadata.routingDecisionSource`
/// from the terminal `result` event, defaulting the source to
/// `provider_result_metadata` whenever a decision is present but the
/// source is absent.
fn extract_routing_decision(
    result: &ProviderEvent,
) -> (Option<String>, Option<RoutingDecisionSource>) {
    let Some(metadata) = &result.metadata else {
        return (None, None);
    };

    let decision = metadata
        .get("routingDecision")
        .and_then(Value::as_str)
        .map(str::to_string);

    let Some(decision) = decision else {
        return (None, None);
    };

    let source = match metadata.get("routingDecisionSource").and_then(Value::as_str) {
        Some("result_content_contract_fallback") => {
            RoutingDecisionSource::ResultContentContractFallback
        }
        _ => RoutingDecisionSource::ProviderResultMetadata,
    };

    (Some(decision), Some(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;
    use alphred_core::{ProviderEventType, ProviderOptions};
    use serde_json::json;

    fn options() -> ProviderOptions {
        ProviderOptions {
            working_directory: "/tmp".to_string(),
            system_prompt: None,
            context: vec![],
            timeout_ms: None,
            model: None,
            execution_permissions: None,
        }
    }

    async fn stream_from(events: Vec<Result<ProviderEvent, ProviderError>>) -> EventStream {
        use crate::provider::Provider;
        let provider = ScriptedProvider::new("stub", events);
        provider.run(options()).await.unwrap()
    }

    fn event(event_type: ProviderEventType, content: Value, metadata: Option<Value>) -> ProviderEvent {
        ProviderEvent {
            event_type,
            content,
            metadata,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn aggregates_incremental_usage_and_extracts_decision() {
        let stream = stream_from(vec![
            Ok(event(
                ProviderEventType::Usage,
                json!({"input_tokens": 10, "output_tokens": 5}),
                None,
            )),
            Ok(event(
                ProviderEventType::Usage,
                json!({"input_tokens": 3, "output_tokens": 2}),
                None,
            )),
            Ok(event(
                ProviderEventType::Result,
                json!({"summary": "done"}),
                Some(json!({"routingDecision": "approved"})),
            )),
        ])
        .await;

        let mut seen = 0;
        let outcome = run_phase(stream, |_| seen += 1).await.unwrap();
        assert_eq!(seen, 3);
        assert_eq!(outcome.tokens_used, Some(20));
        assert_eq!(outcome.routing_decision.as_deref(), Some("approved"));
        assert_eq!(
            outcome.routing_decision_source,
            Some(RoutingDecisionSource::ProviderResultMetadata)
        );
    }

    #[tokio::test]
    async fn cumulative_usage_wins_when_larger_than_incremental_sum() {
        let stream = stream_from(vec![
            Ok(event(
                ProviderEventType::Usage,
                json!({"input_tokens": 1, "output_tokens": 1, "total_tokens": 500}),
                None,
            )),
            Ok(event(ProviderEventType::Result, json!({}), None)),
        ])
        .await;

        let outcome = run_phase(stream, |_| {}).await.unwrap();
        assert_eq!(outcome.tokens_used, Some(500));
    }

    #[tokio::test]
    async fn missing_result_event_is_an_error() {
        let stream = stream_from(vec![Ok(event(ProviderEventType::System, json!({}), None))]).await;
        let err = run_phase(stream, |_| {}).await.unwrap_err();
        assert!(matches!(err.cause, ProviderError::MissingResult));
    }

    #[tokio::test]
    async fn adapter_error_propagates_with_partial_events() {
        let stream = stream_from(vec![
            Ok(event(ProviderEventType::System, json!({}), None)),
            Err(ProviderError::Timeout("slow".to_string())),
        ])
        .await;
        let err = run_phase(stream, |_| {}).await.unwrap_err();
        assert_eq!(err.events.len(), 1);
        assert!(matches!(err.cause, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn defaults_decision_source_to_provider_metadata() {
        let stream = stream_from(vec![Ok(event(
            ProviderEventType::Result,
            json!({}),
            Some(json!({"routingDecision": "retry"})),
        ))])
        .await;
        let outcome = run_phase(stream, |_| {}).await.unwrap();
        assert_eq!(
            outcome.routing_decision_source,
            Some(RoutingDecisionSource::ProviderResultMetadata)
        );
    }
}

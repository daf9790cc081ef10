//! Provider adapter (component C5).
//!
//! Abstracts any agent provider into an ordered event stream matching the
//! canonical grammar in `alphred_core::provider`. Ships a CLI-shelling
//! adapter (grounded in the teacher's `claude` subprocess runner) and a
//! `ScriptedProvider` test double engine tests use to script exact event
//! sequences without a real provider process.

use std::collections::HashMap;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use alphred_core::{ProviderError, ProviderEvent, ProviderEventType, ProviderOptions};
use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send>>;

/// An agent provider: turns a single node invocation into an ordered
/// stream of canonical events, per the contract in `alphred_core::provider`.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, options: ProviderOptions) -> Result<EventStream, ProviderError>;
}

/// Resolves a provider implementation by name, the dynamic-dispatch seam
/// the executor uses instead of hard-coding a single adapter.
pub trait ProviderFactory: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Provider>>;
}

/// A `ProviderFactory` backed by a static name → provider map, populated
/// once at process start.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }
}

impl ProviderFactory for ProviderRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }
}

/// Shells out to the `claude` CLI in non-interactive mode, streaming
/// NDJSON output lines and mapping them to canonical provider events.
/// Grounded in the retry-with-timeout subprocess pattern the teacher's
/// old step runner used, generalized to a streaming adapter instead of a
/// wait-for-exit call.
pub struct ClaudeCliProvider {
    binary: String,
}

impl ClaudeCliProvider {
    pub fn new() -> Self {
        Self {
            binary: "claude".to_string(),
        }
    }
}

impl Default for ClaudeCliProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for ClaudeCliProvider {
    fn name(&self) -> &str {
        "claude-cli"
    }

    async fn run(&self, options: ProviderOptions) -> Result<EventStream, ProviderError> {
        options.validate()?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .current_dir(&options.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(model) = &options.model {
            cmd.arg("--model").arg(model);
        }
        for ctx in &options.context {
            cmd.arg(ctx);
        }

        debug!(provider = self.name(), "spawning provider process");

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProviderError::InvalidConfig(format!("{} binary not found", self.binary))
            } else {
                ProviderError::TransportError(e.to_string())
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::InternalError("missing stdout handle".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let system_event = ProviderEvent {
            event_type: ProviderEventType::System,
            content: json!({
                "provider": self.name(),
                "workingDirectory": options.working_directory,
                "hasSystemPrompt": options.system_prompt.is_some(),
                "contextItemCount": options.context.len(),
                "timeoutMs": options.timeout_ms,
                "model": options.model,
            }),
            metadata: None,
            timestamp: Some(chrono::Utc::now()),
        };

        let timeout_ms = options.timeout_ms;
        let events = stream::once(async move { Ok(system_event) }).chain(stream::unfold(
            (lines, child, false),
            move |(mut lines, mut child, done)| async move {
                if done {
                    return None;
                }
                let next_line = match timeout_ms {
                    Some(ms) => timeout(Duration::from_millis(ms), lines.next_line()).await,
                    None => Ok(lines.next_line().await),
                };

                match next_line {
                    Ok(Ok(Some(line))) => {
                        let parsed = parse_event_line(&line);
                        Some((parsed, (lines, child, false)))
                    }
                    Ok(Ok(None)) => {
                        let status = child.wait().await;
                        let exit_ok = matches!(status, Ok(s) if s.success());
                        if exit_ok {
                            None
                        } else {
                            Some((
                                Err(ProviderError::MissingResult),
                                (lines, child, true),
                            ))
                        }
                    }
                    Ok(Err(e)) => Some((
                        Err(ProviderError::TransportError(e.to_string())),
                        (lines, child, true),
                    )),
                    Err(_) => {
                        warn!("provider process timed out");
                        let _ = child.start_kill();
                        Some((
                            Err(ProviderError::Timeout("provider timed out".to_string())),
                            (lines, child, true),
                        ))
                    }
                }
            },
        ));

        Ok(Box::pin(events))
    }
}

fn parse_event_line(line: &str) -> Result<ProviderEvent, ProviderError> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| ProviderError::InvalidEvent(format!("malformed event line: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| ProviderError::InvalidEvent(format!("unrecognized event shape: {e}")))
}

/// Replays a pre-scripted sequence of events or errors, used by engine
/// tests in place of a real provider process.
pub struct ScriptedProvider {
    name: String,
    script: Vec<Result<ProviderEvent, ProviderError>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, script: Vec<Result<ProviderEvent, ProviderError>>) -> Self {
        Self {
            name: name.into(),
            script,
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, options: ProviderOptions) -> Result<EventStream, ProviderError> {
        options.validate()?;
        let events = self.script.clone();
        Ok(Box::pin(stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alphred_core::ProviderEventType;

    fn event(event_type: ProviderEventType, content: serde_json::Value) -> ProviderEvent {
        ProviderEvent {
            event_type,
            content,
            metadata: None,
            timestamp: None,
        }
    }

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

    #[tokio::test]
    async fn scripted_provider_replays_events_in_order() {
        let provider = ScriptedProvider::new(
            "stub",
            vec![
                Ok(event(ProviderEventType::System, json!({"ok": true}))),
                Ok(event(ProviderEventType::Result, json!({"status": "ok"}))),
            ],
        );
        let mut stream = provider.run(options()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event_type, ProviderEventType::System);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.event_type, ProviderEventType::Result);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn scripted_provider_can_replay_an_error() {
        let provider = ScriptedProvider::new(
            "stub",
            vec![Err(ProviderError::Timeout("slow".to_string()))],
        );
        let mut stream = provider.run(options()).await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(ProviderError::Timeout(_))));
    }

    #[tokio::test]
    async fn run_rejects_invalid_options() {
        let provider = ScriptedProvider::new("stub", vec![]);
        let mut bad = options();
        bad.working_directory = String::new();
        let err = provider.run(bad).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidOptions(_)));
    }

    fn registry_with_stub() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("stub", vec![])));
        registry
    }

    #[test]
    fn registry_resolves_registered_provider_by_name() {
        let registry = registry_with_stub();
        assert!(registry.resolve("stub").is_some());
        assert!(registry.resolve("missing").is_none());
    }
}

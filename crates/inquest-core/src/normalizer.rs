//! Webhook normalization: raw provider payload + headers → canonical event
//! type.
//!
//! Mappers are stateless and deterministic. Resolution order: the
//! authoritative header-declared event name first, falling back to the
//! payload discriminator when the header is absent. An unregistered
//! provider or an unrecognized combination is a non-fatal condition — the
//! ingress should acknowledge and drop the webhook rather than let the
//! provider redeliver an unsupported event type forever.

use std::collections::HashMap;

use crate::error::{InquestError, Result};
use crate::types::{CanonicalEventType, Provider};

// ---------------------------------------------------------------------------
// EventMapper
// ---------------------------------------------------------------------------

pub trait EventMapper: Send + Sync {
    fn map(
        &self,
        body: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<CanonicalEventType>;
}

// ---------------------------------------------------------------------------
// GitLab
// ---------------------------------------------------------------------------

pub struct GitlabMapper;

impl EventMapper for GitlabMapper {
    fn map(
        &self,
        body: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<CanonicalEventType> {
        let header = headers.get("X-Gitlab-Event").map(String::as_str);
        let object_kind = body.get("object_kind").and_then(|v| v.as_str());

        let mapped = match header {
            Some("Issue Hook") => Some(issue_action(body)),
            Some("Note Hook") => Some(CanonicalEventType::Reply),
            Some("Merge Request Hook") => Some(CanonicalEventType::MergeRequestCreated),
            _ => match object_kind {
                Some("issue") => Some(issue_action(body)),
                Some("note") => Some(CanonicalEventType::Reply),
                Some("merge_request") => Some(CanonicalEventType::MergeRequestCreated),
                _ => None,
            },
        };

        mapped.ok_or_else(|| {
            InquestError::UnrecognizedEvent(format!(
                "gitlab: header={:?} object_kind={:?}",
                header, object_kind
            ))
        })
    }
}

/// GitLab issue hooks carry the action under `object_attributes.action`.
fn issue_action(body: &serde_json::Value) -> CanonicalEventType {
    match body
        .get("object_attributes")
        .and_then(|a| a.get("action"))
        .and_then(|v| v.as_str())
    {
        Some("close") => CanonicalEventType::IssueClosed,
        Some("update") => CanonicalEventType::IssueUpdated,
        _ => CanonicalEventType::IssueCreated,
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

pub struct GithubMapper;

impl EventMapper for GithubMapper {
    fn map(
        &self,
        body: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<CanonicalEventType> {
        let header = headers.get("X-GitHub-Event").map(String::as_str);
        let action = body.get("action").and_then(|v| v.as_str());

        let mapped = match header {
            Some("issues") => Some(match action {
                Some("closed") => CanonicalEventType::IssueClosed,
                Some("edited") => CanonicalEventType::IssueUpdated,
                _ => CanonicalEventType::IssueCreated,
            }),
            Some("issue_comment") => Some(CanonicalEventType::Reply),
            Some("pull_request") => Some(CanonicalEventType::MergeRequestCreated),
            // No header: fall back to payload shape.
            None if body.get("comment").is_some() => Some(CanonicalEventType::Reply),
            None if body.get("pull_request").is_some() => {
                Some(CanonicalEventType::MergeRequestCreated)
            }
            None if body.get("issue").is_some() => Some(CanonicalEventType::IssueCreated),
            _ => None,
        };

        mapped.ok_or_else(|| {
            InquestError::UnrecognizedEvent(format!(
                "github: header={:?} action={:?}",
                header, action
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// MapperRegistry
// ---------------------------------------------------------------------------

pub struct MapperRegistry {
    mappers: HashMap<Provider, Box<dyn EventMapper>>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self {
            mappers: HashMap::new(),
        }
    }

    /// Registry with all built-in provider mappers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Provider::Gitlab, Box::new(GitlabMapper));
        registry.register(Provider::Github, Box::new(GithubMapper));
        registry
    }

    pub fn register(&mut self, provider: Provider, mapper: Box<dyn EventMapper>) {
        self.mappers.insert(provider, mapper);
    }

    pub fn normalize(
        &self,
        provider: Provider,
        body: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<CanonicalEventType> {
        let mapper = self
            .mappers
            .get(&provider)
            .ok_or_else(|| InquestError::MapperNotRegistered(provider.to_string()))?;
        mapper.map(body, headers)
    }
}

impl Default for MapperRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

// Copyright 2025 Cowboy AI, LLC.

//! Transport and registry.
//!
//! `ConceptUri` is a validated value type with a dedicated error enum and
//! a `FromStr`/`Display` pair, rather than passing bare strings around.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::errors::{CopfError, CopfResult};
use crate::ids::{CompletionId, FlowId, ParentId};
use crate::storage::ConceptStorage;

/// Errors produced by `ConceptUri` parsing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConceptUriError {
    #[error("concept uri must start with 'urn:copf/'")]
    InvalidPrefix,
    #[error("concept uri has an empty concept name")]
    EmptyName,
    #[error("concept name '{0}' contains invalid characters")]
    InvalidName(String),
}

/// A URI-addressed concept handle: `urn:copf/<ConceptName>`. URIs are the
/// only handle the engine uses to reach a concept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConceptUri(String);

const PREFIX: &str = "urn:copf/";

impl ConceptUri {
    /// Build a URI directly from a bare concept name.
    pub fn for_concept(name: &str) -> Result<Self, ConceptUriError> {
        Self::validate(name)?;
        Ok(Self(name.to_string()))
    }

    /// The bare concept name addressed by this URI.
    pub fn concept_name(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), ConceptUriError> {
        if name.is_empty() {
            return Err(ConceptUriError::EmptyName);
        }
        if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(ConceptUriError::InvalidName(name.to_string()));
        }
        Ok(())
    }
}

impl Display for ConceptUri {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

impl FromStr for ConceptUri {
    type Err = ConceptUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix(PREFIX).ok_or(ConceptUriError::InvalidPrefix)?;
        Self::validate(name)?;
        Ok(Self(name.to_string()))
    }
}

/// An intention to run an action.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
pub struct ActionInvocation {
    pub id: crate::ids::InvocationId,
    pub concept: String,
    pub action: String,
    pub input: Json,
    pub flow: FlowId,
    pub sync: Option<String>,
    pub parent: Option<ParentId>,
    pub timestamp: i64,
}

/// An immutable log record of a finished action.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
pub struct ActionCompletion {
    pub id: CompletionId,
    pub concept: String,
    pub action: String,
    pub input: Json,
    pub variant: String,
    pub output: Json,
    pub flow: FlowId,
    pub parent: Option<ParentId>,
    pub timestamp: i64,
}

/// A concept handler: one function per action name, taking the action's
/// input record and a storage handle, returning `{variant, ...outputs}`.
#[async_trait]
pub trait ConceptHandler: Send + Sync {
    async fn invoke_action(
        &self,
        action: &str,
        input: &Json,
        storage: &dyn ConceptStorage,
    ) -> CopfResult<(String, Json)>;
}

/// Adapts one concept handler to the engine. `Transport` is the abstract
/// interface; `InProcessTransport` is the in-process reference adapter.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn invoke(&self, invocation: &ActionInvocation) -> ActionCompletion;
}

/// The in-process transport: wraps a handler plus its storage handle,
/// times the call, and assigns a completion id/timestamp.
pub struct InProcessTransport<H: ConceptHandler> {
    concept_name: String,
    handler: H,
    storage: Arc<dyn ConceptStorage>,
}

impl<H: ConceptHandler> InProcessTransport<H> {
    pub fn new(concept_name: impl Into<String>, handler: H, storage: Arc<dyn ConceptStorage>) -> Self {
        Self { concept_name: concept_name.into(), handler, storage }
    }
}

#[async_trait]
impl<H: ConceptHandler> Transport for InProcessTransport<H> {
    #[tracing::instrument(skip(self, invocation), fields(concept = %self.concept_name, action = %invocation.action))]
    async fn invoke(&self, invocation: &ActionInvocation) -> ActionCompletion {
        let started = std::time::Instant::now();
        let result = self.handler.invoke_action(&invocation.action, &invocation.input, self.storage.as_ref()).await;
        let elapsed = started.elapsed();
        tracing::debug!(?elapsed, "handler call completed");

        let (variant, output) = match result {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "handler raised an error");
                ("error".to_string(), serde_json::json!({ "reason": err.to_string() }))
            }
        };

        ActionCompletion {
            id: CompletionId::new(),
            concept: self.concept_name.clone(),
            action: invocation.action.clone(),
            input: invocation.input.clone(),
            variant,
            output,
            flow: invocation.flow,
            parent: invocation.parent,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Mapping from `ConceptUri` to `Transport`. Registration order is
/// irrelevant; re-registration replaces the previous transport.
#[derive(Default)]
pub struct Registry {
    transports: RwLock<HashMap<ConceptUri, Arc<dyn Transport>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport for a URI, returning the transport it
    /// replaced, if any.
    pub async fn register(&self, uri: ConceptUri, transport: Arc<dyn Transport>) -> Option<Arc<dyn Transport>> {
        self.transports.write().await.insert(uri, transport)
    }

    /// Look up the transport registered for a URI.
    pub async fn lookup(&self, uri: &ConceptUri) -> Option<Arc<dyn Transport>> {
        self.transports.read().await.get(uri).cloned()
    }

    /// Dispatch an invocation, surfacing an unregistered URI as a
    /// `variant=error` completion rather than propagating a fault across
    /// the engine boundary.
    pub async fn dispatch(&self, invocation: &ActionInvocation) -> ActionCompletion {
        let uri = match ConceptUri::for_concept(&invocation.concept) {
            Ok(uri) => uri,
            Err(e) => return error_completion(invocation, e.to_string()),
        };
        match self.lookup(&uri).await {
            Some(transport) => transport.invoke(invocation).await,
            None => error_completion(invocation, CopfError::RegistryMissing(uri.to_string()).to_string()),
        }
    }
}

fn error_completion(invocation: &ActionInvocation, reason: String) -> ActionCompletion {
    ActionCompletion {
        id: CompletionId::new(),
        concept: invocation.concept.clone(),
        action: invocation.action.clone(),
        input: invocation.input.clone(),
        variant: "error".to_string(),
        output: serde_json::json!({ "reason": reason }),
        flow: invocation.flow,
        parent: invocation.parent,
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

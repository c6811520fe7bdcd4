use crate::{AttributeName, AttributeValue};
use std::collections::BTreeMap;
use std::time::Duration;

/// Construction-time failures of an [`AttributeInvocation`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    #[error("invalid fully-qualified attribute name `{0}`")]
    InvalidName(String),
    #[error("undefined value passed as {0}")]
    NullArgument(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Retry and timing parameters carried by an invocation.
///
/// The broker only consumes `initial_timeout`; the remaining knobs are
/// interpreted by the policy information point that serves the invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationSettings {
    pub initial_timeout: Duration,
    pub poll_interval: Duration,
    pub backoff: Duration,
    pub retry_limit: u64,
}

impl Default for InvocationSettings {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            backoff: Duration::from_millis(50),
            retry_limit: 20,
        }
    }
}

/// Immutable identity and configuration of one attribute request.
///
/// Equality and hashing are structural over all fields; the broker registry
/// uses the invocation as its sole key, so two requests share an upstream
/// subscription exactly when their invocations compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeInvocation {
    name: AttributeName,
    entity: Option<AttributeValue>,
    arguments: Vec<AttributeValue>,
    variables: BTreeMap<String, AttributeValue>,
    settings: InvocationSettings,
}

impl AttributeInvocation {
    /// Validates and builds an invocation. `Undefined` is not a transmissible
    /// value and is rejected wherever a concrete value is expected; an absent
    /// entity is legal (environment attributes have no parent value).
    pub fn new(
        name: impl Into<String>,
        entity: Option<AttributeValue>,
        arguments: Vec<AttributeValue>,
        variables: BTreeMap<String, AttributeValue>,
        settings: InvocationSettings,
    ) -> Result<Self, InvocationError> {
        let name = AttributeName::parse(name)?;
        if matches!(entity, Some(AttributeValue::Undefined)) {
            return Err(InvocationError::NullArgument("entity"));
        }
        if arguments.iter().any(|arg| !arg.is_defined()) {
            return Err(InvocationError::NullArgument("argument"));
        }
        if variables.values().any(|var| !var.is_defined()) {
            return Err(InvocationError::NullArgument("variable"));
        }
        Ok(Self {
            name,
            entity,
            arguments,
            variables,
            settings,
        })
    }

    /// Environment attribute shorthand: no entity, no arguments.
    pub fn environment(
        name: impl Into<String>,
        variables: BTreeMap<String, AttributeValue>,
        settings: InvocationSettings,
    ) -> Result<Self, InvocationError> {
        Self::new(name, None, Vec::new(), variables, settings)
    }

    pub fn name(&self) -> &AttributeName {
        &self.name
    }

    pub fn entity(&self) -> Option<&AttributeValue> {
        self.entity.as_ref()
    }

    pub fn arguments(&self) -> &[AttributeValue] {
        &self.arguments
    }

    pub fn variables(&self) -> &BTreeMap<String, AttributeValue> {
        &self.variables
    }

    pub fn settings(&self) -> &InvocationSettings {
        &self.settings
    }

    pub fn initial_timeout(&self) -> Duration {
        self.settings.initial_timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    pub fn backoff(&self) -> Duration {
        self.settings.backoff
    }

    pub fn retry_limit(&self) -> u64 {
        self.settings.retry_limit
    }
}

//! Collaborator surface towards policy information points (PIPs).
//!
//! A PIP is anything that, given an invocation, yields a possibly-infinite
//! sequence of attribute values. The broker consumes exactly one operation,
//! [`PipRegistry::resolve`], and never retries or transforms the returned
//! sequence; retry and polling behavior is the PIP's business, parameterized
//! by the invocation's settings.

use attr_types::{AttributeInvocation, AttributeValue};
use futures::stream::BoxStream;
use std::collections::HashMap;

/// A cold sequence of attribute values: no work happens until subscribed.
///
/// `Ok` items carry values; value-level failures travel as
/// [`AttributeValue::Error`] elements and do not end the stream. An `Err` item
/// is a transport-level failure and terminal by convention.
pub type AttributeStream = BoxStream<'static, Result<AttributeValue, PipStreamError>>;

/// Failures raised by the PIP layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipStreamError {
    /// No policy information point serves the requested attribute.
    #[error("no policy information point registered for `{0}`")]
    UnknownAttribute(String),
    /// Upstream construction failed before any value was produced.
    #[error("failed to construct upstream for `{attribute}`: {message}")]
    Resolution { attribute: String, message: String },
    /// The upstream died after construction (connection loss and the like).
    #[error("upstream transport failure: {0}")]
    Transport(String),
}

/// Resolves invocations to their upstream value sequences.
pub trait PipRegistry: Send + Sync + 'static {
    /// Builds the cold upstream for `invocation`. A synchronous failure here
    /// is surfaced to every subscriber of the resulting stream as a terminal
    /// error by the broker.
    fn resolve(&self, invocation: &AttributeInvocation) -> Result<AttributeStream, PipStreamError>;
}

impl<F> PipRegistry for F
where
    F: Fn(&AttributeInvocation) -> Result<AttributeStream, PipStreamError>
        + Send
        + Sync
        + 'static,
{
    fn resolve(&self, invocation: &AttributeInvocation) -> Result<AttributeStream, PipStreamError> {
        self(invocation)
    }
}

type PipFactory =
    Box<dyn Fn(&AttributeInvocation) -> Result<AttributeStream, PipStreamError> + Send + Sync>;

/// In-memory [`PipRegistry`] keyed by fully-qualified attribute name.
///
/// Registration happens up front; lookups are read-only afterwards, so no
/// interior locking is needed.
#[derive(Default)]
pub struct StaticPipRegistry {
    factories: HashMap<String, PipFactory>,
}

impl StaticPipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for `name`, replacing any previous registration.
    pub fn with_pip(
        mut self,
        name: impl Into<String>,
        factory: impl Fn(&AttributeInvocation) -> Result<AttributeStream, PipStreamError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }
}

impl PipRegistry for StaticPipRegistry {
    fn resolve(&self, invocation: &AttributeInvocation) -> Result<AttributeStream, PipStreamError> {
        match self.factories.get(invocation.name().as_str()) {
            Some(factory) => factory(invocation),
            None => Err(PipStreamError::UnknownAttribute(
                invocation.name().to_string(),
            )),
        }
    }
}

//! Resolution errors.

use thiserror::Error;

/// Error raised while resolving a provider.
///
/// Every variant is a configuration error: it describes a broken provider
/// graph rather than a bad request. A failed resolution never corrupts the
/// container; later calls behave as if the failed one never happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No provider is registered for the token.
    #[error("Provider not found: {token}")]
    NotFound {
        /// The missing token.
        token: String,
    },

    /// The dependency exists but is not visible from the requester's module.
    #[error("{service} is not available in the scope of {requester} (module {module})")]
    OutOfScope {
        /// The unreachable service.
        service: String,
        /// The provider that asked for it.
        requester: String,
        /// The requester's module.
        module: String,
    },

    /// A provider depends on itself, directly or transitively.
    #[error("Circular dependency detected: {}", chain.join(" -> "))]
    Circular {
        /// The resolution path, ending with the repeated token.
        chain: Vec<String>,
    },

    /// The provider has no action with the requested name.
    #[error("Method {method} not found on {token}")]
    MethodNotFound {
        /// The provider.
        token: String,
        /// The missing action.
        method: String,
    },

    /// A resolved value does not have the expected type.
    #[error("Dependency {name} is not a {expected}")]
    TypeMismatch {
        /// The dependency or token name.
        name: String,
        /// The expected type.
        expected: String,
    },

    /// A declared dependency was not resolved.
    #[error("Dependency {name} was not resolved")]
    MissingDependency {
        /// The dependency name.
        name: String,
    },

    /// A request-scoped provider was resolved outside a request.
    #[error("No request context is active to resolve {token}")]
    NoRequestContext {
        /// The request-scoped token.
        token: String,
    },

    /// A constructor or factory failed.
    #[error("Failed to construct {token}: {reason}")]
    Construction {
        /// The provider being built.
        token: String,
        /// Why construction failed.
        reason: String,
    },
}

impl ResolveError {
    /// Creates a construction error.
    #[must_use]
    pub fn construction(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Construction {
            token: token.into(),
            reason: reason.into(),
        }
    }

    /// Creates a type mismatch error for `T`.
    #[must_use]
    pub fn type_mismatch<T: ?Sized>(name: impl Into<String>) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected: super::short_type_name(std::any::type_name::<T>()).to_string(),
        }
    }

    /// Returns the variant name, used as the error kind in traces.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ProviderNotFound",
            Self::OutOfScope { .. } => "ProviderOutOfScope",
            Self::Circular { .. } => "CircularDependency",
            Self::MethodNotFound { .. } => "MethodNotFound",
            Self::TypeMismatch { .. } => "TypeMismatch",
            Self::MissingDependency { .. } => "MissingDependency",
            Self::NoRequestContext { .. } => "NoRequestContext",
            Self::Construction { .. } => "ConstructionError",
        }
    }
}

//! Error handling for the sensor hub
//!
//! This module defines the error taxonomy shared by the pipeline and the
//! resource manager, plus a Result alias. Every fallible operation in the
//! core reports failure by return value; nothing in here is fatal.

use crate::pipeline::packet::PayloadKind;
use crate::types::SessionId;
use thiserror::Error;

/// Main error type for sensor hub operations
#[derive(Error, Debug)]
pub enum HubError {
    /// No adaptor, chain, filter or sensor is registered under this id
    #[error("Unknown {kind} id '{id}'")]
    UnknownId { kind: &'static str, id: String },

    /// The id is registered but its type has no factory
    #[error("Factory for {kind} type '{type_name}' not registered")]
    FactoryNotRegistered {
        kind: &'static str,
        type_name: String,
    },

    /// Session id was never handed out or was already released
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    /// Named component or port could not be resolved
    #[error("Port '{component}.{port}' not found")]
    PortNotFound { component: String, port: String },

    /// Source and sink carry different payload types
    #[error("Type mismatch joining {source_kind} to {sink_kind}")]
    TypeMismatch {
        source_kind: PayloadKind,
        sink_kind: PayloadKind,
    },

    /// A component name is already used within a bin
    #[error("Duplicate component name '{0}'")]
    DuplicateName(String),

    /// Start/stop/standby/resume called in the wrong state
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Interval request outside of every allowed range
    #[error("Invalid interval {value} ms for '{node}'")]
    InvalidInterval { node: String, value: u32 },

    /// Adaptor was constructed but refused to start
    #[error("Adaptor '{0}' can not be started")]
    AdaptorNotStarted(String),

    /// Plugin (or one of its dependencies) is not in the catalogue
    #[error("Plugin '{0}' not found")]
    PluginNotFound(String),

    /// Plugin dependencies form a cycle
    #[error("Plugin dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Hardware collaborator failure
    #[error("Device error: {0}")]
    Device(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<HubError>,
    },
}

impl HubError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        HubError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn unknown_id(kind: &'static str, id: impl Into<String>) -> Self {
        HubError::UnknownId {
            kind,
            id: id.into(),
        }
    }

    /// Strip any context wrappers and return the innermost error
    pub fn root(&self) -> &HubError {
        match self {
            HubError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for sensor hub operations
pub type Result<T> = std::result::Result<T, HubError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HubError::unknown_id("adaptor", "accelerometeradaptor");
        assert_eq!(err.to_string(), "Unknown adaptor id 'accelerometeradaptor'");
    }

    #[test]
    fn test_error_with_context() {
        let err = HubError::Lifecycle("already started".to_string());
        let with_ctx = err.with_context("Failed to start chain");
        assert!(with_ctx.to_string().contains("Failed to start chain"));
        assert!(matches!(with_ctx.root(), HubError::Lifecycle(_)));
    }

    #[test]
    fn test_dependency_cycle_display() {
        let err = HubError::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Plugin dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = HubError::TypeMismatch {
            source_kind: PayloadKind::TimedXyz,
            sink_kind: PayloadKind::TimedUnsigned,
        };
        assert!(err.to_string().contains("TimedXyz"));
        assert!(err.to_string().contains("TimedUnsigned"));
    }
}

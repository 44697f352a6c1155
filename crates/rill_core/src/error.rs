//! Component error types

use thiserror::Error;

/// Errors raised while wiring or running components
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComponentError {
    /// A stateful model was given no state source
    #[error("component '{component}' defines a model but received no state source")]
    MissingStateSource { component: String },

    /// The same name was registered twice across peers and components
    #[error("component '{component}' registers '{name}' more than once")]
    DuplicateComponent { component: String, name: String },

    /// A placeholder names a component that is not registered
    #[error("component not found: {0}")]
    UnknownComponent(String),

    /// A `rill-factory` placeholder carried no factory
    #[error("factory placeholder '{0}' carries no component factory")]
    MissingFactory(String),

    /// Malformed `collection` placeholder
    #[error("invalid collection in '{component}': {reason}")]
    InvalidCollection { component: String, reason: String },

    /// Malformed `switchable` placeholder
    #[error("invalid switchable in '{component}': {reason}")]
    InvalidSwitchable { component: String, reason: String },

    /// `request` routes were declared without a request source
    #[error("component '{component}' declares request routes but has no '{source_name}' source")]
    MissingRequestSource {
        component: String,
        source_name: String,
    },

    /// The request source does not serve this method
    #[error("invalid method in request map of '{component}': {method}")]
    UnknownRequestMethod { component: String, method: String },

    /// A `response` function was given without a `request` map
    #[error("component '{0}' has a response function but no request map")]
    ResponseWithoutRequest(String),

    /// A response value could not be correlated to a request
    #[error("no request id found for response '{command}' in '{component}'")]
    MissingRequestId { component: String, command: String },

    /// `classes()` was handed an invalid CSS class name
    #[error("{0} is not a valid CSS class name")]
    InvalidClassName(String),

    /// Configuration could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for component operations
pub type Result<T> = std::result::Result<T, ComponentError>;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("header '{0}' is not present on the message")]
    MissingHeader(String),

    #[error("header '{key}' holds a {kind} value that cannot be used as a payload")]
    UnsupportedValue { key: String, kind: &'static str },

    #[error("no projection registered for route '{0}'")]
    UnknownRoute(String),

    #[error("route '{0}' is registered more than once")]
    DuplicateRoute(String),

    #[error("invalid route definition '{0}', expected 'route=headerKey'")]
    InvalidRoute(String),

    #[error("invalid missing header policy '{0}', expected 'empty' or 'reject'")]
    InvalidPolicy(String),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use flow_bridge::{ErrorPayload, ExchangeResponse};
use flow_model::{EntityKind, InstanceId};
use thiserror::Error;

pub type EndpointResult<T> = Result<T, EndpointError>;

/// Errors raised while handling one exchange. Each one answers the whole
/// request with an `error` payload the bridge can read.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("{kind} {instance_id} is not part of this request")]
    UnknownEntity {
        kind: EntityKind,
        instance_id: InstanceId,
    },

    #[error("no server component handles {0}")]
    UnknownComponent(String),

    #[error("{name} has no action {action}")]
    UnknownAction { name: String, action: String },

    #[error("{action} failed: {reason}")]
    Action { action: String, reason: String },
}

impl EndpointError {
    pub fn action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Action {
            action: action.into(),
            reason: reason.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Action { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::UnknownEntity { .. } => "UnknownEntityException",
            Self::UnknownComponent(_) => "UnknownComponentException",
            Self::UnknownAction { .. } => "BadMethodCallException",
            Self::Action { .. } => "RuntimeException",
        }
    }
}

impl IntoResponse for EndpointError {
    fn into_response(self) -> Response {
        let body = ExchangeResponse {
            error: Some(ErrorPayload::new(self.error_type(), self.to_string())),
            ..ExchangeResponse::default()
        };
        (self.status(), Json(body)).into_response()
    }
}

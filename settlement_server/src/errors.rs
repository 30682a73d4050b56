use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use log::error;
use settlement_engine::SettlementError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Payload deserialization error")]
    CouldNotDeserializePayload,
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    GatewayTimeout(String),
    #[error("{0}")]
    GatewayFailure(String),
    #[error("Requests from this address are not allowed.")]
    ForbiddenPeer,
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::CouldNotDeserializePayload => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::GatewayFailure(_) => StatusCode::BAD_GATEWAY,
            Self::ForbiddenPeer => StatusCode::FORBIDDEN,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<SettlementError> for ServerError {
    fn from(e: SettlementError) -> Self {
        use SettlementError::*;
        match e {
            ValidationError(_) => Self::ValidationError(e.to_string()),
            OrderNotFound(_) |
            AllocationNotFound(_) |
            DisputeNotFound(_) |
            RuleNotFound(_) |
            EscrowNotFound(_) |
            SellerNotOnOrder { .. } => Self::NoRecordFound(e.to_string()),
            NoCommissionRule { .. } |
            OverlappingRule(_) |
            AllocationMismatch { .. } |
            InvalidStateTransition { .. } |
            ReleaseNotDue { .. } |
            DuplicateDispute(_) |
            AllocationAlreadySettled(_) |
            DisputeAlreadyResolved(_) |
            ConcurrentModification(_) |
            DuplicateEvent(_) => Self::Conflict(e.to_string()),
            GatewayTimeout(_) => Self::GatewayTimeout(e.to_string()),
            GatewayRejected { .. } => Self::GatewayFailure(e.to_string()),
            DatabaseError(_) | LookupError(_) => {
                error!("💻️ Backend failure: {e}");
                Self::BackendError(e.to_string())
            },
        }
    }
}

#[cfg(test)]
mod test {
    use settlement_engine::{db_types::OrderId, validation::ValidationErrors};

    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (SettlementError::from(ValidationErrors::single("amount", "must be positive")), StatusCode::BAD_REQUEST),
            (SettlementError::OrderNotFound(OrderId::from("o1")), StatusCode::NOT_FOUND),
            (SettlementError::DuplicateDispute(4), StatusCode::CONFLICT),
            (SettlementError::ConcurrentModification(OrderId::from("o1")), StatusCode::CONFLICT),
            (SettlementError::GatewayTimeout("refund:4".into()), StatusCode::GATEWAY_TIMEOUT),
            (SettlementError::DatabaseError("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status_code(), status);
        }
    }

    #[test]
    fn error_body_is_json() {
        let err = ServerError::from(SettlementError::AllocationAlreadySettled(12));
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "Allocation #12 has already been settled");
    }
}

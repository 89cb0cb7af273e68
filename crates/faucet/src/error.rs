//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Reasons a dispense request is turned away before anything is sent.
///
/// Variants are listed in the order the guards run; the display text is the
/// exact message returned to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("Invalid RSK address format.")]
    InvalidAddress,

    #[error("Address already used today.")]
    AlreadyUsed,

    #[error("Please complete captcha.")]
    MissingVerification,

    #[error("We can not transfer any amount right now. Try again later.")]
    NodeSyncing,

    #[error("Failed captcha verification.")]
    VerificationFailed,
}

impl Rejection {
    /// Short label used as a metrics dimension.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::InvalidAddress => "invalid_address",
            Rejection::AlreadyUsed => "already_used",
            Rejection::MissingVerification => "missing_verification",
            Rejection::NodeSyncing => "node_syncing",
            Rejection::VerificationFailed => "verification_failed",
        }
    }
}

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("{0}")]
    Rejected(#[from] Rejection),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FaucetError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FaucetError::Rejected(_) => StatusCode::BAD_REQUEST,
            FaucetError::Rpc(_) => StatusCode::BAD_GATEWAY,
            FaucetError::InvalidConfig(_) | FaucetError::Signing(_) | FaucetError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            FaucetError::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            FaucetError::Rejected(reason) => reason.to_string(),
            FaucetError::Rpc(_) => {
                "We can not transfer any amount right now. Try again later.".to_string()
            }
            _ => "Internal server error.".to_string(),
        };

        (status, body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;

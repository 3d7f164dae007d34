// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use timevault_kernel::KernelError;

use crate::identity::IdentityError;
use crate::ledger::LedgerError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Signing identity unusable: {0}")]
    Signing(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            EngineError::Ledger(l_err) => match l_err {
                LedgerError::InvalidIntent(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
                LedgerError::DuplicateIntent(id) => (
                    StatusCode::CONFLICT,
                    json!({ "error": format!("intent {} already applied", id) }),
                ),
                err @ LedgerError::Overdraft { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": err.to_string() }))
                }
                LedgerError::PartiallyApplied { intent_id, reason } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": format!("balances updated but anchor not persisted: {}", reason),
                        "partial": true,
                        "applied_id": intent_id,
                    }),
                ),
                other => {
                    tracing::error!("Ledger failure: {}", other);
                    (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "storage failure" }))
                }
            },
            EngineError::Store(StoreError::InvalidId(id)) => {
                (StatusCode::NOT_FOUND, json!({ "error": format!("no record {:?}", id) }))
            }
            EngineError::Store(err) => {
                tracing::error!("Store failure: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "storage failure" }))
            }
            EngineError::NotFound(what) => (StatusCode::NOT_FOUND, json!({ "error": format!("not found: {}", what) })),
            EngineError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            EngineError::Signing(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
            EngineError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal server error" })),
        };

        (status, Json(body)).into_response()
    }
}

impl From<KernelError> for EngineError {
    fn from(e: KernelError) -> Self {
        EngineError::Ledger(LedgerError::from(e))
    }
}

impl From<IdentityError> for EngineError {
    fn from(e: IdentityError) -> Self {
        EngineError::Signing(e.to_string())
    }
}

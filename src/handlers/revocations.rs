use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::action::{ActionRecord, Command, Purpose},
    services::revocation::RevocationService,
};

/// The request payload for publishing a revocation command.
#[derive(Deserialize, Validate, Debug)]
pub struct PublishRequest {
    #[garde(length(min = 1, max = 255))]
    pub subject_id: String,
    #[garde(skip)]
    pub action: Command,
}

/// A command as reported to operators.
#[derive(Serialize, Debug)]
pub struct RevocationResponse {
    pub subject_id: String,
    pub purpose: Purpose,
    pub issued_at: DateTime<Utc>,
}

impl RevocationResponse {
    fn new(subject_id: String, record: ActionRecord) -> Self {
        Self {
            subject_id,
            purpose: record.purpose,
            issued_at: record.issued_at,
        }
    }
}

/// Publishes a command for every session of a subject.
#[axum::debug_handler]
pub async fn publish(
    State(revocations): State<RevocationService>,
    Json(payload): Json<PublishRequest>,
) -> Result<Response> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    tracing::info!("📝 Publish {:?} for subject {}", payload.action, payload.subject_id);

    let record = revocations
        .publish(&payload.subject_id, payload.action)
        .await?;

    let response = RevocationResponse::new(payload.subject_id, record);
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

/// Returns the command pending for a subject.
#[axum::debug_handler]
pub async fn pending(
    State(revocations): State<RevocationService>,
    Path(subject_id): Path<String>,
) -> Result<Response> {
    let record = revocations
        .pending(&subject_id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok((StatusCode::OK, Json(RevocationResponse::new(subject_id, record))).into_response())
}

//! Request handlers for the thin outer router — this router exists so the
//! binary is runnable, not as a product surface.

use super::error::ApiError;
use crate::audit::AuditEntryBuilder;
use crate::context::AppContext;
use crate::domain::{CitizenRecord, FieldValue, OverlayField};
use crate::error::CoreError;
use crate::phone::ConfirmOutcome;
use crate::store::filter_eq;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const CITIZEN_RECORD_COLLECTION: &str = "citizen_record";

pub async fn healthz(State(ctx): State<Arc<AppContext>>) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.kv.ping().await?;
    ctx.store.ping().await?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn get_citizen_view(
    State(ctx): State<Arc<AppContext>>,
    Path(cpf): Path<String>,
) -> Result<Json<crate::domain::CitizenView>, ApiError> {
    let filter = filter_eq("cpf", cpf.clone());
    let base = ctx
        .store
        .find_one(CITIZEN_RECORD_COLLECTION, &filter, None)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("citizen record for cpf {cpf}")))?;
    let base: CitizenRecord = serde_json::from_value(base).map_err(CoreError::from)?;
    let view = ctx.overlay.get_view(&base).await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
pub struct UpdateFieldRequest {
    field: OverlayField,
    value: FieldValue,
    expected_version: i64,
}

#[derive(Serialize)]
pub struct UpdateFieldResponse {
    version: i64,
}

pub async fn update_field(
    State(ctx): State<Arc<AppContext>>,
    Path(cpf): Path<String>,
    Json(request): Json<UpdateFieldRequest>,
) -> Result<Json<UpdateFieldResponse>, ApiError> {
    let version = ctx
        .overlay
        .update_field(&cpf, request.field, request.value.clone(), request.expected_version)
        .await?;

    ctx.audit
        .record(
            AuditEntryBuilder::new("overlay.update_field", "citizen_overlay", cpf)
                .new_value(serde_json::to_value(&request.value).map_err(CoreError::from)?)
                .build(ctx.config.audit_retention),
        )
        .await;

    Ok(Json(UpdateFieldResponse { version }))
}

#[derive(Deserialize)]
pub struct RequestVerificationRequest {
    phone: String,
}

pub async fn request_verification(
    State(ctx): State<Arc<AppContext>>,
    Path(cpf): Path<String>,
    Json(request): Json<RequestVerificationRequest>,
) -> Result<StatusCode, ApiError> {
    ctx.phone.request_verification(&cpf, &request.phone).await?;

    ctx.audit
        .record(
            AuditEntryBuilder::new("phone.request_verification", "phone_verification", cpf)
                .new_value(json!({ "phone": request.phone }))
                .build(ctx.config.audit_retention),
        )
        .await;

    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct ConfirmVerificationRequest {
    phone: String,
    code: String,
}

#[derive(Serialize)]
pub struct ConfirmVerificationResponse {
    outcome: &'static str,
}

pub async fn confirm_verification(
    State(ctx): State<Arc<AppContext>>,
    Path(cpf): Path<String>,
    Json(request): Json<ConfirmVerificationRequest>,
) -> Result<Json<ConfirmVerificationResponse>, ApiError> {
    let outcome = ctx.phone.confirm_verification(&cpf, &request.phone, &request.code).await?;
    let outcome = match outcome {
        ConfirmOutcome::Verified => "verified",
        ConfirmOutcome::Expired => "expired",
        ConfirmOutcome::Invalid => "invalid",
    };

    ctx.audit
        .record(
            AuditEntryBuilder::new("phone.confirm_verification", "phone_verification", cpf)
                .new_value(json!({ "phone": request.phone, "outcome": outcome }))
                .build(ctx.config.audit_retention),
        )
        .await;

    Ok(Json(ConfirmVerificationResponse { outcome }))
}

pub async fn quarantine_phone(
    State(ctx): State<Arc<AppContext>>,
    Path(phone): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.phone.quarantine(&phone).await?;

    ctx.audit
        .record(
            AuditEntryBuilder::new("phone.quarantine", "phone_mapping", phone)
                .build(ctx.config.audit_retention),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

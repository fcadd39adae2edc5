use super::{ApiError, AppState};
use crate::activitypub::{activity, signature};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;

pub(crate) async fn shared_inbox(
    State(state): State<AppState>,
    parts: Parts,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    accept_delivery(&state, None, &parts, &body).await
}

pub(crate) async fn user_inbox(
    State(state): State<AppState>,
    Path(username): Path<String>,
    parts: Parts,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    accept_delivery(&state, Some(&username), &parts, &body).await
}

/// Decode, authenticate, record. Processing happens later in the sweeper.
async fn accept_delivery(
    state: &AppState,
    recipient: Option<&str>,
    request: &Parts,
    body: &[u8],
) -> Result<StatusCode, ApiError> {
    let activity = activity::decode(body).map_err(|err| {
        tracing::debug!(error = %err, "rejecting undecodable delivery");
        ApiError::BadRequest(err.to_string())
    })?;

    let signer = match state.verifier.verify(request, body).await {
        Ok(signer) => signer,
        Err(err) => {
            tracing::warn!(
                activity = %activity.id,
                actor = %activity.actor,
                error = %err,
                "rejecting delivery with unverifiable signature"
            );
            return Err(err.into());
        }
    };
    signature::ensure_same_actor(&signer, &activity.actor).map_err(|err| {
        tracing::warn!(activity = %activity.id, error = %err, "signer does not match activity actor");
        ApiError::from(err)
    })?;

    let entry = state
        .ledger
        .enqueue(body, Some(&activity.id), Some(&signer))?;
    tracing::info!(
        entry = %entry.id,
        activity = %activity.id,
        kind = %activity.kind,
        actor = %signer,
        recipient = recipient.unwrap_or("<shared>"),
        "accepted inbound activity"
    );
    if let Some(sweeper) = &state.sweeper {
        sweeper.wake();
    }
    Ok(StatusCode::ACCEPTED)
}

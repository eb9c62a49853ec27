//! Payment service and outbox processing
//!
//! `create_payment` writes the payment row and its PAYMENT_CREATED outbox
//! event in one transaction; the outbox worker then drives the charge to
//! the PSP with persisted exponential backoff. The PSP's webhook is the
//! source of truth for the terminal state: an accepted charge parks the
//! payment in PROCESSING until the provider confirms.

use crate::audit;
use crate::errors::{DispatchError, DispatchResult};
use crate::events::DomainEvent;
use crate::models::{Payment, AGGREGATE_PAYMENT, EVENT_PAYMENT_CREATED};
use crate::psp::webhook::WebhookPayload;
use crate::repos::{outbox_repo, payment_repo, ride_repo, trip_repo};
use crate::state::AppState;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

const MAX_RETRIES_REASON: &str = "max retries exceeded";

/// Create a payment for an ENDED trip, atomically with its outbox event
pub async fn create_payment(state: &AppState, trip_id: Uuid) -> DispatchResult<Payment> {
    let mut tx = state.pool.begin().await.map_err(DispatchError::from)?;

    let trip = trip_repo::fetch_for_update(&mut tx, trip_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("trip", trip_id))?;

    let amount = trip
        .total_fare
        .ok_or_else(|| DispatchError::not_found("billable trip", trip_id))?;

    let payment = payment_repo::insert(
        &mut tx,
        Uuid::new_v4(),
        trip_id,
        amount,
        state.config.payment_max_retries,
    )
    .await?;

    let payload = serde_json::to_value(&payment)
        .map_err(|e| DispatchError::DependencyFailure(format!("encode payment: {}", e)))?;
    outbox_repo::enqueue(
        &mut tx,
        AGGREGATE_PAYMENT,
        payment.id,
        EVENT_PAYMENT_CREATED,
        &payload,
    )
    .await?;

    tx.commit().await.map_err(DispatchError::from)?;

    let method = ride_payment_method(state, trip.ride_id).await;
    state
        .metrics
        .payments_created_total
        .with_label_values(&[method.as_str()])
        .inc();

    tracing::info!(
        payment_id = %payment.id,
        trip_id = %trip_id,
        amount = %amount,
        "payment created with outbox event"
    );

    Ok(payment)
}

async fn ride_payment_method(state: &AppState, ride_id: Uuid) -> String {
    match ride_repo::fetch(&state.pool, ride_id).await {
        Ok(Some(ride)) => ride.payment_method,
        _ => "UNKNOWN".to_string(),
    }
}

/// Drive one outbox event: submit the charge, or retire the payment
///
/// Invoked by the outbox worker with the payment row locked for the whole
/// call. Terminal and in-flight payments only mark the event processed;
/// everything else either goes to the PSP or burns a retry.
pub async fn process_payment(
    state: &AppState,
    payment_id: Uuid,
    outbox_id: Uuid,
) -> DispatchResult<()> {
    let mut tx = state.pool.begin().await.map_err(DispatchError::from)?;

    let payment = payment_repo::fetch_for_update(&mut tx, payment_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("payment", payment_id))?;

    // already in flight or settled: nothing to submit
    if matches!(payment.status.as_str(), "PROCESSING" | "COMPLETED" | "FAILED") {
        outbox_repo::mark_processed(&mut tx, outbox_id).await?;
        tx.commit().await.map_err(DispatchError::from)?;
        tracing::debug!(
            payment_id = %payment_id,
            status = %payment.status,
            "outbox event retired without psp call"
        );
        return Ok(());
    }

    if payment.retry_count >= payment.max_retries {
        payment_repo::mark_failed(&mut tx, payment_id, MAX_RETRIES_REASON).await?;
        audit::record_payment_transition(&mut tx, payment_id, &payment.status, "FAILED").await?;
        outbox_repo::mark_processed(&mut tx, outbox_id).await?;
        tx.commit().await.map_err(DispatchError::from)?;

        state
            .metrics
            .payments_finalized_total
            .with_label_values(&["FAILED", "retries_exhausted"])
            .inc();
        tracing::warn!(
            payment_id = %payment_id,
            retry_count = payment.retry_count,
            "payment failed, retry budget exhausted"
        );

        let failed = payment_repo::fetch(&state.pool, payment_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("payment", payment_id))?;
        notify_payment_outcome(state, &failed).await;
        state
            .publisher
            .publish(DomainEvent::PaymentFailed(failed))
            .await;
        return Ok(());
    }

    match state.psp.charge(payment_id, payment.amount).await {
        Ok(acceptance) => {
            payment_repo::mark_processing(
                &mut tx,
                payment_id,
                &acceptance.transaction_id,
                &acceptance.raw,
            )
            .await?;
            audit::record_payment_transition(&mut tx, payment_id, &payment.status, "PROCESSING")
                .await?;
            // outbox stays unprocessed: the webhook finalizes it
            tx.commit().await.map_err(DispatchError::from)?;

            state
                .metrics
                .psp_calls_total
                .with_label_values(&["accepted"])
                .inc();
            tracing::info!(
                payment_id = %payment_id,
                transaction_id = %acceptance.transaction_id,
                "psp accepted charge, awaiting webhook"
            );
        }
        Err(e) => {
            let new_count = payment.retry_count + 1;
            let backoff = &state.config.payment_retry_backoff;
            let idx = ((new_count - 1).max(0) as usize).min(backoff.len() - 1);
            let next_retry_at = Utc::now()
                + ChronoDuration::from_std(backoff[idx])
                    .unwrap_or_else(|_| ChronoDuration::seconds(30));

            payment_repo::record_retry_failure(&mut tx, payment_id, next_retry_at, &e.to_string())
                .await?;
            // outbox stays unprocessed: it becomes due again at next_retry_at
            tx.commit().await.map_err(DispatchError::from)?;

            state
                .metrics
                .psp_calls_total
                .with_label_values(&["error"])
                .inc();
            tracing::warn!(
                payment_id = %payment_id,
                retry_count = new_count,
                next_retry_at = %next_retry_at,
                error = %e,
                "psp call failed, retry scheduled"
            );
        }
    }

    Ok(())
}

/// PSP webhook: the authoritative terminal write for a payment
///
/// The signature is verified against the raw body before anything is read
/// from the store. Finalization is idempotent: a payment already terminal
/// is left untouched apart from retiring its outbox events.
pub async fn handle_webhook(
    state: &AppState,
    raw_body: &str,
    signature: Option<&str>,
) -> DispatchResult<Payment> {
    let signature = signature
        .ok_or_else(|| DispatchError::Unauthorized("missing webhook signature".to_string()))?;

    crate::psp::webhook::verify_signature(
        raw_body,
        signature,
        &state.config.psp_webhook_secret,
        crate::psp::webhook::DEFAULT_TOLERANCE_SECS,
    )?;

    let payload: WebhookPayload = serde_json::from_str(raw_body)
        .map_err(|e| DispatchError::ValidationFailed(format!("malformed webhook body: {}", e)))?;

    let raw_json: serde_json::Value = serde_json::from_str(raw_body)
        .map_err(|e| DispatchError::ValidationFailed(format!("malformed webhook body: {}", e)))?;

    let target = if payload.status == "succeeded" {
        "COMPLETED"
    } else {
        "FAILED"
    };

    let mut tx = state.pool.begin().await.map_err(DispatchError::from)?;

    let payment = payment_repo::fetch_for_update(&mut tx, payload.payment_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("payment", payload.payment_id))?;

    // moves out of PROCESSING are irreversible; a duplicate webhook only
    // retires any leftover outbox rows
    if matches!(payment.status.as_str(), "COMPLETED" | "FAILED") {
        outbox_repo::mark_processed_for_aggregate(&mut tx, payment.id).await?;
        tx.commit().await.map_err(DispatchError::from)?;
        tracing::debug!(
            payment_id = %payment.id,
            status = %payment.status,
            "duplicate webhook ignored"
        );
        return Ok(payment);
    }

    let finalized = payment_repo::finalize(
        &mut tx,
        payment.id,
        target,
        payload.transaction_id.as_deref(),
        &raw_json,
    )
    .await?;
    audit::record_payment_transition(&mut tx, payment.id, &payment.status, target).await?;
    outbox_repo::mark_processed_for_aggregate(&mut tx, payment.id).await?;

    tx.commit().await.map_err(DispatchError::from)?;

    state
        .metrics
        .payments_finalized_total
        .with_label_values(&[target, "webhook"])
        .inc();
    tracing::info!(
        payment_id = %finalized.id,
        status = %finalized.status,
        "payment finalized by webhook"
    );

    notify_payment_outcome(state, &finalized).await;

    let event = if target == "COMPLETED" {
        DomainEvent::PaymentCompleted(finalized.clone())
    } else {
        DomainEvent::PaymentFailed(finalized.clone())
    };
    state.publisher.publish(event).await;

    Ok(finalized)
}

pub async fn get_payment(state: &AppState, id: Uuid) -> DispatchResult<Payment> {
    payment_repo::fetch(&state.pool, id)
        .await?
        .ok_or_else(|| DispatchError::not_found("payment", id))
}

/// Tell the rider how their payment went; best-effort
async fn notify_payment_outcome(state: &AppState, payment: &Payment) {
    let rider_id = match trip_repo::fetch(&state.pool, payment.trip_id).await {
        Ok(Some(trip)) => match ride_repo::fetch(&state.pool, trip.ride_id).await {
            Ok(Some(ride)) => ride.rider_id,
            _ => return,
        },
        _ => return,
    };

    let message = match payment.status.as_str() {
        "COMPLETED" => format!("Payment of {} received, thank you", payment.amount),
        _ => format!(
            "Payment of {} failed: {}",
            payment.amount,
            payment.failure_reason.as_deref().unwrap_or("unknown error")
        ),
    };

    state.notifier.notify_rider(rider_id, &message).await;
}

//! Outbox worker
//!
//! Polls unprocessed PAYMENT_CREATED events and drives each payment through
//! the PSP. The fetch is gated on the payment's `next_retry_at`, so the
//! per-payment backoff holds even though the poll itself is frequent.
//! Failures are logged and retried on a later tick; the worker never dies.

use crate::repos::outbox_repo;
use crate::services::payments;
use crate::state::AppState;
use std::time::Instant;
use tokio::sync::watch;

pub async fn run_outbox_worker(state: AppState, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(
        poll_interval = ?state.config.outbox_poll_interval,
        batch_size = state.config.outbox_batch_size,
        "outbox worker started"
    );

    let mut interval = tokio::time::interval(state.config.outbox_poll_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let started = Instant::now();
        match run_iteration(&state).await {
            Ok(processed) if processed > 0 => {
                tracing::debug!(processed, "outbox iteration complete");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "outbox iteration failed");
            }
        }
        state
            .metrics
            .dispatch_iteration_seconds
            .with_label_values(&["outbox"])
            .observe(started.elapsed().as_secs_f64());
    }

    tracing::info!("outbox worker stopped");
}

/// One poll over the due events
pub async fn run_iteration(state: &AppState) -> Result<usize, crate::errors::DispatchError> {
    let events =
        outbox_repo::fetch_due_payment_events(&state.pool, state.config.outbox_batch_size).await?;
    let count = events.len();

    for event in events {
        if let Err(e) = payments::process_payment(state, event.aggregate_id, event.id).await {
            // left unprocessed; it will come around on a later tick
            tracing::warn!(
                outbox_id = %event.id,
                payment_id = %event.aggregate_id,
                error = %e,
                "outbox event processing failed"
            );
        }
    }

    Ok(count)
}

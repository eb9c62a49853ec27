//! State-transition audit log
//!
//! Every transition is recorded in the same transaction that performs it, so
//! the log and the entity row can never disagree.

use crate::state_machine::EntityKind;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub async fn record_transition(
    tx: &mut Transaction<'_, Postgres>,
    kind: EntityKind,
    entity_id: Uuid,
    from_state: &str,
    to_state: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO state_transitions (entity_kind, entity_id, from_state, to_state)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(kind.as_str())
    .bind(entity_id)
    .bind(from_state)
    .bind(to_state)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Payments are audited under their own kind string; they sit outside the
/// three-entity state machine but their transitions are still logged.
pub async fn record_payment_transition(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
    from_state: &str,
    to_state: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO state_transitions (entity_kind, entity_id, from_state, to_state)
        VALUES ('payment', $1, $2, $3)
        "#,
    )
    .bind(payment_id)
    .bind(from_state)
    .bind(to_state)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

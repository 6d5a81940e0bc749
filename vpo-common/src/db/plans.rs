//! Plan records and the approval workflow.
//!
//! Plans persist evaluator output for operator review or audit. Status
//! changes are validated against a closed transition table; anything else
//! is rejected with `Error::InvalidPlanTransition`.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::helpers::clamp_limit;
use super::models::{now_timestamp, PlanRecord, PlanStatus};

const PLAN_COLUMNS: &str = "id, file_id, file_path, policy_name, policy_version, job_id, \
     actions_json, action_count, requires_remux, status, created_at, updated_at";

fn row_to_plan_record(row: &sqlx::sqlite::SqliteRow) -> Result<PlanRecord> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    Ok(PlanRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Integrity(format!("malformed plan id {id:?}: {e}")))?,
        file_id: row.get("file_id"),
        file_path: row.get("file_path"),
        policy_name: row.get("policy_name"),
        policy_version: row.get("policy_version"),
        job_id: row.get("job_id"),
        actions_json: row.get("actions_json"),
        action_count: row.get("action_count"),
        requires_remux: row.get::<i64, _>("requires_remux") == 1,
        status: PlanStatus::parse(&status)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// The closed transition table.
fn is_valid_transition(from: PlanStatus, to: PlanStatus) -> bool {
    use PlanStatus::*;
    matches!(
        (from, to),
        (Pending, Approved)
            | (Pending, Rejected)
            | (Pending, Canceled)
            | (Approved, Applied)
            | (Approved, Canceled)
    )
}

/// Persist a new plan in pending status.
pub async fn create_plan(pool: &SqlitePool, plan: &PlanRecord) -> Result<Uuid> {
    sqlx::query(
        r#"
        INSERT INTO plans (
            id, file_id, file_path, policy_name, policy_version, job_id,
            actions_json, action_count, requires_remux, status,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(plan.id.to_string())
    .bind(plan.file_id)
    .bind(&plan.file_path)
    .bind(&plan.policy_name)
    .bind(plan.policy_version)
    .bind(&plan.job_id)
    .bind(&plan.actions_json)
    .bind(plan.action_count)
    .bind(plan.requires_remux as i64)
    .bind(plan.status.as_str())
    .bind(&plan.created_at)
    .bind(&plan.updated_at)
    .execute(pool)
    .await?;
    Ok(plan.id)
}

pub async fn get_plan(pool: &SqlitePool, plan_id: Uuid) -> Result<Option<PlanRecord>> {
    let row = sqlx::query(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?"))
        .bind(plan_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_plan_record).transpose()
}

/// Move a plan to a new status, enforcing the transition table.
pub async fn update_plan_status(
    pool: &SqlitePool,
    plan_id: Uuid,
    new_status: PlanStatus,
) -> Result<PlanRecord> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?"))
        .bind(plan_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("plan {plan_id}")))?;
    let current = row_to_plan_record(&row)?;

    if !is_valid_transition(current.status, new_status) {
        return Err(Error::InvalidPlanTransition {
            from: current.status.as_str().to_string(),
            to: new_status.as_str().to_string(),
        });
    }

    sqlx::query("UPDATE plans SET status = ?, updated_at = ? WHERE id = ?")
        .bind(new_status.as_str())
        .bind(now_timestamp())
        .bind(plan_id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    get_plan(pool, plan_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("plan {plan_id}")))
}

/// List plans, optionally restricted to one status, newest first.
pub async fn list_plans(
    pool: &SqlitePool,
    status: Option<PlanStatus>,
    limit: Option<i64>,
) -> Result<Vec<PlanRecord>> {
    let limit = clamp_limit(limit);
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "SELECT {PLAN_COLUMNS} FROM plans WHERE status = ? \
                 ORDER BY created_at DESC LIMIT ?"
            ))
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {PLAN_COLUMNS} FROM plans ORDER BY created_at DESC LIMIT ?"
            ))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    rows.iter().map(row_to_plan_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    fn sample_plan() -> PlanRecord {
        PlanRecord {
            id: Uuid::new_v4(),
            file_id: None,
            file_path: "/m/a.mkv".to_string(),
            policy_name: "default".to_string(),
            policy_version: 1,
            job_id: None,
            actions_json: "[]".to_string(),
            action_count: 0,
            requires_remux: false,
            status: PlanStatus::Pending,
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
        }
    }

    #[tokio::test]
    async fn valid_transitions_succeed() {
        let pool = init_memory_database().await.unwrap();
        let plan = sample_plan();
        create_plan(&pool, &plan).await.unwrap();

        let approved = update_plan_status(&pool, plan.id, PlanStatus::Approved)
            .await
            .unwrap();
        assert_eq!(approved.status, PlanStatus::Approved);

        let applied = update_plan_status(&pool, plan.id, PlanStatus::Applied)
            .await
            .unwrap();
        assert_eq!(applied.status, PlanStatus::Applied);
    }

    #[tokio::test]
    async fn invalid_transitions_are_rejected() {
        let pool = init_memory_database().await.unwrap();
        let plan = sample_plan();
        create_plan(&pool, &plan).await.unwrap();

        // pending -> applied skips approval
        let result = update_plan_status(&pool, plan.id, PlanStatus::Applied).await;
        assert!(matches!(
            result,
            Err(Error::InvalidPlanTransition { .. })
        ));

        // Terminal states accept nothing further.
        update_plan_status(&pool, plan.id, PlanStatus::Rejected)
            .await
            .unwrap();
        let result = update_plan_status(&pool, plan.id, PlanStatus::Approved).await;
        assert!(matches!(
            result,
            Err(Error::InvalidPlanTransition { .. })
        ));
    }

    #[tokio::test]
    async fn every_pair_matches_the_closed_table() {
        use PlanStatus::*;
        let all = [Pending, Approved, Rejected, Applied, Canceled];
        for from in all {
            for to in all {
                let expected = matches!(
                    (from, to),
                    (Pending, Approved)
                        | (Pending, Rejected)
                        | (Pending, Canceled)
                        | (Approved, Applied)
                        | (Approved, Canceled)
                );
                assert_eq!(is_valid_transition(from, to), expected, "{from:?}->{to:?}");
            }
        }
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let pool = init_memory_database().await.unwrap();
        let a = sample_plan();
        let b = sample_plan();
        create_plan(&pool, &a).await.unwrap();
        create_plan(&pool, &b).await.unwrap();
        update_plan_status(&pool, b.id, PlanStatus::Approved)
            .await
            .unwrap();

        let pending = list_plans(&pool, Some(PlanStatus::Pending), None)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);

        let all = list_plans(&pool, None, None).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}

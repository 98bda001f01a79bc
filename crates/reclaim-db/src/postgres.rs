//! Postgres record store
//!
//! Dynamic SQLx queries (no compile-time DATABASE_URL requirement). Records
//! decode through the manual `FromRow` impls beside the models, which parse
//! status text into the closed enums so a record with an unknown status
//! fails loudly at the store boundary instead of leaking into the engine.
//! The atomic batch write is a transaction.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use reclaim_core::error::AppError;
use reclaim_core::models::{Claim, ClaimStatus, FoundItem, Locker, UserAccount};

use crate::store::{RecordBatch, RecordStore, WriteOp};

const CLAIM_COLUMNS: &str = "claim_id, found_item_id, student_id, face_embedding, \
     verification_method, status, qr_token, qr_image_ref, expires_at, \
     student_remarks, admin_remarks, approved_by, approved_at, rejected_by, \
     rejected_at, cancelled_by, cancelled_at, cancellation_reason, verified_at, \
     created_at, updated_at";

const ITEM_COLUMNS: &str = "found_item_id, found_item_name, category, is_valuable, status, \
     locker_id, rfid_tag, image_url, approved_by, approved_at, claimed_by, \
     claimed_at, created_at, updated_at";

const LOCKER_COLUMNS: &str = "locker_id, status, found_item_id, location, open_started_at, \
     opened_by, auto_close_at, closed_at, updated_at";

/// Postgres implementation of [`RecordStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small default pool.
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn upsert_claim<'e, E>(executor: E, claim: &Claim) -> Result<(), AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO claims (
            claim_id, found_item_id, student_id, face_embedding,
            verification_method, status, qr_token, qr_image_ref, expires_at,
            student_remarks, admin_remarks, approved_by, approved_at,
            rejected_by, rejected_at, cancelled_by, cancelled_at,
            cancellation_reason, verified_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21)
        ON CONFLICT (claim_id) DO UPDATE SET
            face_embedding = EXCLUDED.face_embedding,
            verification_method = EXCLUDED.verification_method,
            status = EXCLUDED.status,
            qr_token = EXCLUDED.qr_token,
            qr_image_ref = EXCLUDED.qr_image_ref,
            expires_at = EXCLUDED.expires_at,
            student_remarks = EXCLUDED.student_remarks,
            admin_remarks = EXCLUDED.admin_remarks,
            approved_by = EXCLUDED.approved_by,
            approved_at = EXCLUDED.approved_at,
            rejected_by = EXCLUDED.rejected_by,
            rejected_at = EXCLUDED.rejected_at,
            cancelled_by = EXCLUDED.cancelled_by,
            cancelled_at = EXCLUDED.cancelled_at,
            cancellation_reason = EXCLUDED.cancellation_reason,
            verified_at = EXCLUDED.verified_at,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&claim.claim_id)
    .bind(&claim.found_item_id)
    .bind(&claim.student_id)
    .bind(&claim.face_embedding)
    .bind(claim.verification_method.map(|m| m.to_string()))
    .bind(claim.status.to_string())
    .bind(&claim.qr_token)
    .bind(&claim.qr_image_ref)
    .bind(claim.expires_at)
    .bind(&claim.student_remarks)
    .bind(&claim.admin_remarks)
    .bind(&claim.approved_by)
    .bind(claim.approved_at)
    .bind(&claim.rejected_by)
    .bind(claim.rejected_at)
    .bind(&claim.cancelled_by)
    .bind(claim.cancelled_at)
    .bind(&claim.cancellation_reason)
    .bind(claim.verified_at)
    .bind(claim.created_at)
    .bind(claim.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn upsert_item<'e, E>(executor: E, item: &FoundItem) -> Result<(), AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO found_items (
            found_item_id, found_item_name, category, is_valuable, status,
            locker_id, rfid_tag, image_url, approved_by, approved_at,
            claimed_by, claimed_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (found_item_id) DO UPDATE SET
            found_item_name = EXCLUDED.found_item_name,
            category = EXCLUDED.category,
            is_valuable = EXCLUDED.is_valuable,
            status = EXCLUDED.status,
            locker_id = EXCLUDED.locker_id,
            rfid_tag = EXCLUDED.rfid_tag,
            image_url = EXCLUDED.image_url,
            approved_by = EXCLUDED.approved_by,
            approved_at = EXCLUDED.approved_at,
            claimed_by = EXCLUDED.claimed_by,
            claimed_at = EXCLUDED.claimed_at,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&item.found_item_id)
    .bind(&item.found_item_name)
    .bind(&item.category)
    .bind(item.is_valuable)
    .bind(item.status.to_string())
    .bind(&item.locker_id)
    .bind(&item.rfid_tag)
    .bind(&item.image_url)
    .bind(&item.approved_by)
    .bind(item.approved_at)
    .bind(&item.claimed_by)
    .bind(item.claimed_at)
    .bind(item.created_at)
    .bind(item.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn upsert_locker<'e, E>(executor: E, locker: &Locker) -> Result<(), AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO lockers (
            locker_id, status, found_item_id, location, open_started_at,
            opened_by, auto_close_at, closed_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (locker_id) DO UPDATE SET
            status = EXCLUDED.status,
            found_item_id = EXCLUDED.found_item_id,
            location = EXCLUDED.location,
            open_started_at = EXCLUDED.open_started_at,
            opened_by = EXCLUDED.opened_by,
            auto_close_at = EXCLUDED.auto_close_at,
            closed_at = EXCLUDED.closed_at,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&locker.locker_id)
    .bind(locker.status.to_string())
    .bind(&locker.found_item_id)
    .bind(&locker.location)
    .bind(locker.open_started_at)
    .bind(&locker.opened_by)
    .bind(locker.auto_close_at)
    .bind(locker.closed_at)
    .bind(locker.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl RecordStore for PgStore {
    async fn get_claim(&self, claim_id: &str) -> Result<Option<Claim>, AppError> {
        let claim = sqlx::query_as::<_, Claim>(&format!(
            "SELECT {} FROM claims WHERE claim_id = $1",
            CLAIM_COLUMNS
        ))
        .bind(claim_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(claim)
    }

    async fn put_claim(&self, claim: &Claim) -> Result<(), AppError> {
        upsert_claim(&self.pool, claim).await
    }

    async fn claims_for_student(&self, student_id: &str) -> Result<Vec<Claim>, AppError> {
        let claims = sqlx::query_as::<_, Claim>(&format!(
            "SELECT {} FROM claims WHERE student_id = $1",
            CLAIM_COLUMNS
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(claims)
    }

    async fn claims_for_item(&self, found_item_id: &str) -> Result<Vec<Claim>, AppError> {
        let claims = sqlx::query_as::<_, Claim>(&format!(
            "SELECT {} FROM claims WHERE found_item_id = $1",
            CLAIM_COLUMNS
        ))
        .bind(found_item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(claims)
    }

    async fn claims_for_pair(
        &self,
        student_id: &str,
        found_item_id: &str,
    ) -> Result<Vec<Claim>, AppError> {
        let claims = sqlx::query_as::<_, Claim>(&format!(
            "SELECT {} FROM claims WHERE student_id = $1 AND found_item_id = $2",
            CLAIM_COLUMNS
        ))
        .bind(student_id)
        .bind(found_item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(claims)
    }

    async fn claims_with_status(&self, status: ClaimStatus) -> Result<Vec<Claim>, AppError> {
        let claims = sqlx::query_as::<_, Claim>(&format!(
            "SELECT {} FROM claims WHERE status = $1",
            CLAIM_COLUMNS
        ))
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(claims)
    }

    async fn all_claims(&self) -> Result<Vec<Claim>, AppError> {
        let claims =
            sqlx::query_as::<_, Claim>(&format!("SELECT {} FROM claims", CLAIM_COLUMNS))
                .fetch_all(&self.pool)
                .await?;
        Ok(claims)
    }

    async fn latest_claim_id(&self) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT claim_id FROM claims ORDER BY claim_id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("claim_id")))
    }

    async fn get_item(&self, found_item_id: &str) -> Result<Option<FoundItem>, AppError> {
        let item = sqlx::query_as::<_, FoundItem>(&format!(
            "SELECT {} FROM found_items WHERE found_item_id = $1",
            ITEM_COLUMNS
        ))
        .bind(found_item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    async fn put_item(&self, item: &FoundItem) -> Result<(), AppError> {
        upsert_item(&self.pool, item).await
    }

    async fn get_locker(&self, locker_id: &str) -> Result<Option<Locker>, AppError> {
        let locker = sqlx::query_as::<_, Locker>(&format!(
            "SELECT {} FROM lockers WHERE locker_id = $1",
            LOCKER_COLUMNS
        ))
        .bind(locker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(locker)
    }

    async fn put_locker(&self, locker: &Locker) -> Result<(), AppError> {
        upsert_locker(&self.pool, locker).await
    }

    async fn open_lockers(&self) -> Result<Vec<Locker>, AppError> {
        let lockers = sqlx::query_as::<_, Locker>(&format!(
            "SELECT {} FROM lockers WHERE status = 'open'",
            LOCKER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(lockers)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, AppError> {
        let user = sqlx::query_as::<_, UserAccount>(
            "SELECT user_id, name, email, role, status, created_at \
             FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn put_user(&self, user: &UserAccount) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, name, email, role, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                role = EXCLUDED.role,
                status = EXCLUDED.status
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.to_string())
        .bind(user.status.to_string())
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, batch), fields(ops = batch.len()))]
    async fn apply(&self, batch: RecordBatch) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        for op in batch.ops() {
            match op {
                WriteOp::PutClaim(claim) => upsert_claim(&mut *tx, claim).await?,
                WriteOp::PutItem(item) => upsert_item(&mut *tx, item).await?,
                WriteOp::PutLocker(locker) => upsert_locker(&mut *tx, locker).await?,
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

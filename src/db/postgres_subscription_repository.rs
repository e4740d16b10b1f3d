use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::db::subscription_repository::{CheckoutUpsertOutcome, SubscriptionRepository};
use crate::models::subscription::{
    CheckoutSubscription, NewSubscription, ProcessorSubscriptionUpdate, Subscription,
    SubscriptionAction, SubscriptionError, SubscriptionRow, SubscriptionStatus,
};

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, user_id, plan_id, status, billing_period, stripe_subscription_id,
    current_period_start, current_period_end, cancellation_reason, cancel_at,
    auto_renew, created_at, updated_at
"#;

pub struct PostgresSubscriptionRepository {
    pub pool: PgPool,
}

enum LockKey<'a> {
    User(Uuid),
    StripeSubscription(&'a str),
}

async fn fetch_for_update(
    conn: &mut PgConnection,
    key: LockKey<'_>,
) -> Result<Option<Subscription>, sqlx::Error> {
    let row = match key {
        LockKey::User(user_id) => {
            let sql = format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 FOR UPDATE"
            );
            sqlx::query_as::<_, SubscriptionRow>(&sql)
                .bind(user_id)
                .fetch_optional(conn)
                .await?
        }
        LockKey::StripeSubscription(external_id) => {
            let sql = format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE stripe_subscription_id = $1 FOR UPDATE"
            );
            sqlx::query_as::<_, SubscriptionRow>(&sql)
                .bind(external_id)
                .fetch_optional(conn)
                .await?
        }
    };
    row.map(Subscription::try_from).transpose()
}

async fn write_back(
    conn: &mut PgConnection,
    sub: &Subscription,
) -> Result<Subscription, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE subscriptions
        SET status = $2,
            auto_renew = $3,
            cancellation_reason = $4,
            cancel_at = $5,
            current_period_start = $6,
            current_period_end = $7,
            updated_at = now()
        WHERE id = $1
        RETURNING {SUBSCRIPTION_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
        .bind(sub.id)
        .bind(sub.status.as_str())
        .bind(sub.auto_renew)
        .bind(sub.cancellation_reason.as_deref())
        .bind(sub.cancel_at)
        .bind(sub.current_period_start)
        .bind(sub.current_period_end)
        .fetch_one(conn)
        .await?;
    Subscription::try_from(row)
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1");
        let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE stripe_subscription_id = $1"
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(stripe_subscription_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn create_direct(
        &self,
        new: &NewSubscription,
    ) -> Result<Subscription, SubscriptionError> {
        let sql = format!(
            r#"
            INSERT INTO subscriptions (id, user_id, plan_id, status, billing_period,
                                       current_period_start, current_period_end, auto_renew)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.user_id)
            .bind(new.plan_id)
            .bind(SubscriptionStatus::Active.as_str())
            .bind(new.billing_period.as_str())
            .bind(new.current_period_start)
            .bind(new.current_period_end)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => Ok(Subscription::try_from(row)?),
            Err(err) if is_unique_violation(&err) => Err(SubscriptionError::AlreadySubscribed),
            Err(err) => Err(err.into()),
        }
    }

    async fn apply_transition(
        &self,
        user_id: Uuid,
        action: SubscriptionAction,
        reason: Option<&str>,
    ) -> Result<Subscription, SubscriptionError> {
        let mut tx = self.pool.begin().await?;

        let mut sub = fetch_for_update(&mut *tx, LockKey::User(user_id))
            .await?
            .ok_or(SubscriptionError::NotFound)?;

        // Dropping `tx` on a rejected transition rolls back and releases the lock.
        sub.apply(action, reason)?;

        let updated = write_back(&mut *tx, &sub).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn upsert_from_checkout(
        &self,
        checkout: &CheckoutSubscription,
    ) -> Result<CheckoutUpsertOutcome, SubscriptionError> {
        let sql = format!(
            r#"
            INSERT INTO subscriptions (id, user_id, plan_id, status, billing_period,
                                       stripe_subscription_id, auto_renew)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            ON CONFLICT (stripe_subscription_id) DO NOTHING
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(checkout.user_id)
            .bind(checkout.plan_id)
            .bind(SubscriptionStatus::Active.as_str())
            .bind(checkout.billing_period.as_str())
            .bind(&checkout.stripe_subscription_id)
            .fetch_optional(&self.pool)
            .await;

        match inserted {
            Ok(Some(row)) => Ok(CheckoutUpsertOutcome::Created(Subscription::try_from(row)?)),
            Ok(None) => {
                let existing = self
                    .find_by_stripe_subscription_id(&checkout.stripe_subscription_id)
                    .await?
                    .ok_or(SubscriptionError::NotFound)?;
                Ok(CheckoutUpsertOutcome::AlreadyRecorded(existing))
            }
            Err(err) if is_unique_violation(&err) => Err(SubscriptionError::AlreadySubscribed),
            Err(err) => Err(err.into()),
        }
    }

    async fn sync_from_processor(
        &self,
        update: &ProcessorSubscriptionUpdate,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let Some(mut sub) = fetch_for_update(
            &mut *tx,
            LockKey::StripeSubscription(&update.stripe_subscription_id),
        )
        .await?
        else {
            return Ok(None);
        };

        update.apply_to(&mut sub);
        let updated = write_back(&mut *tx, &sub).await?;
        tx.commit().await?;
        Ok(Some(updated))
    }
}

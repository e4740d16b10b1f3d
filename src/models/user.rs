use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// Processor customer id, created lazily on first checkout or portal visit.
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

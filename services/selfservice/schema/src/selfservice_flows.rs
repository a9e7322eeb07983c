use sea_orm::entity::prelude::*;

/// Recovery or verification flow. `submit_count` is the per-flow attempt
/// counter bumped by every code redemption.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "selfservice_flows")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub nid: Uuid,
    /// `recovery` | `verification`
    pub kind: String,
    /// `browser` | `api`
    pub flow_type: String,
    /// `choose_method` | `sent` | `passed_challenge`
    pub state: String,
    pub csrf_token: String,
    pub request_url: String,
    pub return_to: Option<String>,
    pub ui: Json,
    pub submit_count: i32,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

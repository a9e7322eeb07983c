//! Dispatchers that queue templates in the outbox. Delivery itself is done by
//! the courier process draining `outbox_events`.

use anyhow::Context as _;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection};
use uuid::Uuid;

use tessera_selfservice_schema::outbox_events;

use crate::domain::repository::Dispatcher;
use crate::domain::template::Template;
use crate::error::SelfServiceError;

pub const EMAIL_EVENT_KIND: &str = "courier.email";
pub const SMS_EVENT_KIND: &str = "courier.sms";

#[derive(Clone)]
pub struct EmailCourier {
    pub db: DatabaseConnection,
    pub nid: Uuid,
}

impl Dispatcher for EmailCourier {
    async fn dispatch(&self, template: &Template) -> Result<Uuid, SelfServiceError> {
        enqueue(&self.db, self.nid, EMAIL_EVENT_KIND, template).await
    }
}

#[derive(Clone)]
pub struct SmsCourier {
    pub db: DatabaseConnection,
    pub nid: Uuid,
}

impl Dispatcher for SmsCourier {
    async fn dispatch(&self, template: &Template) -> Result<Uuid, SelfServiceError> {
        enqueue(&self.db, self.nid, SMS_EVENT_KIND, template).await
    }
}

async fn enqueue(
    db: &DatabaseConnection,
    nid: Uuid,
    kind: &str,
    template: &Template,
) -> Result<Uuid, SelfServiceError> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let payload = serde_json::to_value(template).context("encode courier template")?;
    outbox_events::ActiveModel {
        id: Set(id),
        nid: Set(nid),
        kind: Set(kind.to_owned()),
        payload: Set(payload),
        idempotency_key: Set(format!("courier:{id}")),
        attempts: Set(0),
        last_error: Set(None),
        created_at: Set(now),
        next_attempt_at: Set(now),
        processed_at: Set(None),
        failed_at: Set(None),
    }
    .insert(db)
    .await
    .with_context(|| format!("queue {} message", template.template_type()))?;
    tracing::debug!(message_id = %id, kind, template = template.template_type(), "message queued");
    Ok(id)
}

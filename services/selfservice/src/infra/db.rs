use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbBackend, EntityTrait, FromQueryResult, QueryFilter,
    Statement, TransactionTrait,
};
use uuid::Uuid;

use tessera_selfservice_schema::{identities, identity_addresses, selfservice_flows};

use crate::domain::code::{CodeGenerator, submissions_exhausted};
use crate::domain::repository::{CodeRepository, FlowRepository, IdentityPort};
use crate::domain::types::{
    Address, AddressKind, AddressStatus, Channel, Code, CreateCodeParams, Flow, FlowKind,
    FlowState, FlowType, FlowUi, Identity, IssuedCode,
};
use crate::error::SelfServiceError;

// ── Code repository ───────────────────────────────────────────────────────────

/// Codes of both kinds. The two tables share one layout, so statements are
/// built against `FlowKind::code_table`.
#[derive(Clone)]
pub struct DbCodeRepository {
    pub db: DatabaseConnection,
    pub nid: Uuid,
    pub generator: Arc<CodeGenerator>,
}

#[derive(Debug, FromQueryResult)]
struct CodeRow {
    id: Uuid,
    nid: Uuid,
    flow_id: Uuid,
    identity_id: Uuid,
    address_id: Uuid,
    code_hmac: String,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl CodeRow {
    fn into_code(self, kind: FlowKind) -> Code {
        Code {
            id: self.id,
            nid: self.nid,
            kind,
            flow_id: self.flow_id,
            identity_id: self.identity_id,
            address_id: self.address_id,
            code_hmac: self.code_hmac,
            expires_at: self.expires_at,
            used_at: self.used_at,
            created_at: self.created_at,
        }
    }
}

impl CodeRepository for DbCodeRepository {
    async fn create_code(
        &self,
        kind: FlowKind,
        params: &CreateCodeParams,
    ) -> Result<IssuedCode, SelfServiceError> {
        let raw = self.generator.generate();
        let now = Utc::now();
        let code = Code {
            id: Uuid::new_v4(),
            nid: self.nid,
            kind,
            flow_id: params.flow_id,
            identity_id: params.identity_id,
            address_id: params.address_id,
            code_hmac: self.generator.digest(&raw)?,
            expires_at: now + params.expires_in,
            used_at: None,
            created_at: now,
        };

        let sql = format!(
            "INSERT INTO {} (id, nid, flow_id, identity_id, address_id, code_hmac, expires_at, used_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8)",
            kind.code_table()
        );
        self.db
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql,
                [
                    code.id.into(),
                    code.nid.into(),
                    code.flow_id.into(),
                    code.identity_id.into(),
                    code.address_id.into(),
                    code.code_hmac.clone().into(),
                    code.expires_at.into(),
                    code.created_at.into(),
                ],
            ))
            .await
            .with_context(|| format!("insert {kind} code"))
            .map_err(SelfServiceError::CodeCreationFailed)?;

        Ok(IssuedCode { code, raw })
    }

    async fn use_code(
        &self,
        kind: FlowKind,
        flow_id: Uuid,
        raw: &str,
    ) -> Result<Code, SelfServiceError> {
        let nid = self.nid;
        let generator = self.generator.clone();
        let raw = raw.to_owned();

        // The redemption outcome rides inside Ok so the counter increment
        // commits even when the code is rejected.
        let outcome = self
            .db
            .transaction::<_, Result<Code, SelfServiceError>, sea_orm::DbErr>(|txn| {
                Box::pin(async move {
                    let Some(submit_count) = bump_submit_count(txn, nid, kind, flow_id).await?
                    else {
                        return Ok(Err(SelfServiceError::CodeNotFound));
                    };
                    if submissions_exhausted(submit_count) {
                        return Ok(Err(SelfServiceError::CodeSubmittedTooOften));
                    }

                    let codes = load_codes(txn, nid, kind, flow_id).await?;
                    let code = match generator.redeem(&codes, &raw, Utc::now()) {
                        Ok(code) => code.clone(),
                        Err(e) => return Ok(Err(e)),
                    };

                    let sql = format!(
                        "UPDATE {} SET used_at = $1 WHERE id = $2 AND nid = $3 AND used_at IS NULL",
                        kind.code_table()
                    );
                    let now = Utc::now();
                    let result = txn
                        .execute(Statement::from_sql_and_values(
                            DbBackend::Postgres,
                            sql,
                            [now.into(), code.id.into(), nid.into()],
                        ))
                        .await?;
                    if result.rows_affected() == 0 {
                        return Ok(Err(SelfServiceError::CodeAlreadyUsed));
                    }
                    Ok(Ok(Code {
                        used_at: Some(now),
                        ..code
                    }))
                })
            })
            .await
            .with_context(|| format!("use {kind} code"))?;
        outcome
    }

    async fn delete_codes_of_flow(
        &self,
        kind: FlowKind,
        flow_id: Uuid,
    ) -> Result<(), SelfServiceError> {
        let sql = format!(
            "DELETE FROM {} WHERE flow_id = $1 AND nid = $2",
            kind.code_table()
        );
        self.db
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql,
                [flow_id.into(), self.nid.into()],
            ))
            .await
            .with_context(|| format!("delete {kind} codes of flow"))?;
        Ok(())
    }

    async fn count_codes_of_flow(
        &self,
        kind: FlowKind,
        flow_id: Uuid,
    ) -> Result<u64, SelfServiceError> {
        let sql = format!(
            "SELECT COUNT(*) AS count FROM {} WHERE flow_id = $1 AND nid = $2",
            kind.code_table()
        );
        let row = self
            .db
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql,
                [flow_id.into(), self.nid.into()],
            ))
            .await
            .with_context(|| format!("count {kind} codes of flow"))?;
        let count = match row {
            Some(row) => row
                .try_get::<i64>("", "count")
                .context("read code count")?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }
}

/// Increment the flow's submission counter, locking its row until commit.
/// `None` when no such flow exists in this network.
async fn bump_submit_count(
    txn: &DatabaseTransaction,
    nid: Uuid,
    kind: FlowKind,
    flow_id: Uuid,
) -> Result<Option<i32>, sea_orm::DbErr> {
    let row = txn
        .query_one(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE selfservice_flows SET submit_count = submit_count + 1 \
             WHERE id = $1 AND nid = $2 AND kind = $3 RETURNING submit_count",
            [flow_id.into(), nid.into(), kind.as_str().into()],
        ))
        .await?;
    row.map(|row| row.try_get::<i32>("", "submit_count"))
        .transpose()
}

async fn load_codes(
    txn: &DatabaseTransaction,
    nid: Uuid,
    kind: FlowKind,
    flow_id: Uuid,
) -> Result<Vec<Code>, sea_orm::DbErr> {
    let sql = format!(
        "SELECT id, nid, flow_id, identity_id, address_id, code_hmac, expires_at, used_at, created_at \
         FROM {} WHERE flow_id = $1 AND nid = $2",
        kind.code_table()
    );
    let rows = CodeRow::find_by_statement(Statement::from_sql_and_values(
        DbBackend::Postgres,
        sql,
        [flow_id.into(), nid.into()],
    ))
    .all(txn)
    .await?;
    Ok(rows.into_iter().map(|row| row.into_code(kind)).collect())
}

// ── Flow repository ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbFlowRepository {
    pub db: DatabaseConnection,
    pub nid: Uuid,
}

impl FlowRepository for DbFlowRepository {
    async fn create(&self, flow: &Flow) -> Result<(), SelfServiceError> {
        let ui = serde_json::to_value(&flow.ui).context("encode flow ui")?;
        selfservice_flows::ActiveModel {
            id: Set(flow.id),
            nid: Set(self.nid),
            kind: Set(flow.kind.as_str().to_owned()),
            flow_type: Set(flow.flow_type.as_str().to_owned()),
            state: Set(flow.state.as_str().to_owned()),
            csrf_token: Set(flow.csrf_token.clone()),
            request_url: Set(flow.request_url.clone()),
            return_to: Set(flow.return_to.clone()),
            ui: Set(ui),
            submit_count: Set(0),
            issued_at: Set(flow.issued_at),
            expires_at: Set(flow.expires_at),
            created_at: Set(flow.created_at),
            updated_at: Set(flow.updated_at),
        }
        .insert(&self.db)
        .await
        .context("create flow")?;
        Ok(())
    }

    async fn find(&self, kind: FlowKind, id: Uuid) -> Result<Option<Flow>, SelfServiceError> {
        let model = selfservice_flows::Entity::find_by_id(id)
            .filter(selfservice_flows::Column::Nid.eq(self.nid))
            .filter(selfservice_flows::Column::Kind.eq(kind.as_str()))
            .one(&self.db)
            .await
            .context("find flow")?;
        model.map(flow_from_model).transpose()
    }

    async fn update(&self, flow: &Flow, expected: FlowState) -> Result<(), SelfServiceError> {
        let ui = serde_json::to_value(&flow.ui).context("encode flow ui")?;
        let result = selfservice_flows::Entity::update_many()
            .col_expr(
                selfservice_flows::Column::State,
                Expr::value(flow.state.as_str()),
            )
            .col_expr(selfservice_flows::Column::Ui, Expr::value(ui))
            .col_expr(
                selfservice_flows::Column::UpdatedAt,
                Expr::value(flow.updated_at),
            )
            .filter(selfservice_flows::Column::Id.eq(flow.id))
            .filter(selfservice_flows::Column::Nid.eq(self.nid))
            .filter(selfservice_flows::Column::State.eq(expected.as_str()))
            .exec(&self.db)
            .await
            .context("update flow")?;
        // Another request moved the flow on (or removed it) since it was loaded.
        if result.rows_affected == 0 {
            return Err(SelfServiceError::FlowStateConflict);
        }
        Ok(())
    }

    async fn delete(&self, kind: FlowKind, id: Uuid) -> Result<(), SelfServiceError> {
        selfservice_flows::Entity::delete_many()
            .filter(selfservice_flows::Column::Id.eq(id))
            .filter(selfservice_flows::Column::Nid.eq(self.nid))
            .filter(selfservice_flows::Column::Kind.eq(kind.as_str()))
            .exec(&self.db)
            .await
            .context("delete flow")?;
        Ok(())
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(FlowKind, Uuid)>, SelfServiceError> {
        let models = selfservice_flows::Entity::find()
            .filter(selfservice_flows::Column::Nid.eq(self.nid))
            .filter(selfservice_flows::Column::ExpiresAt.lte(now))
            .all(&self.db)
            .await
            .context("list expired flows")?;
        Ok(models
            .into_iter()
            .filter_map(|m| match FlowKind::parse(&m.kind) {
                Some(kind) => Some((kind, m.id)),
                None => {
                    tracing::warn!(flow_id = %m.id, kind = %m.kind, "skipping flow of unknown kind");
                    None
                }
            })
            .collect())
    }
}

fn flow_from_model(model: selfservice_flows::Model) -> Result<Flow, SelfServiceError> {
    let kind = FlowKind::parse(&model.kind)
        .with_context(|| format!("unknown flow kind {:?}", model.kind))?;
    let flow_type = FlowType::parse(&model.flow_type)
        .with_context(|| format!("unknown flow type {:?}", model.flow_type))?;
    let state = FlowState::parse(&model.state).ok_or(SelfServiceError::InvalidFlowState)?;
    let ui: FlowUi = serde_json::from_value(model.ui).context("decode flow ui")?;
    Ok(Flow {
        id: model.id,
        nid: model.nid,
        kind,
        flow_type,
        state,
        csrf_token: model.csrf_token,
        request_url: model.request_url,
        return_to: model.return_to,
        ui,
        submit_count: model.submit_count,
        issued_at: model.issued_at,
        expires_at: model.expires_at,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

// ── Identity repository ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbIdentityRepository {
    pub db: DatabaseConnection,
    pub nid: Uuid,
}

impl IdentityPort for DbIdentityRepository {
    async fn find_address(
        &self,
        kind: FlowKind,
        via: Channel,
        value: &str,
    ) -> Result<Option<Address>, SelfServiceError> {
        let model = identity_addresses::Entity::find()
            .filter(identity_addresses::Column::Nid.eq(self.nid))
            .filter(identity_addresses::Column::Kind.eq(kind.address_kind().as_str()))
            .filter(identity_addresses::Column::Via.eq(via.as_str()))
            .filter(identity_addresses::Column::Value.eq(normalize_address(via, value)))
            .one(&self.db)
            .await
            .context("find address")?;
        model.map(address_from_model).transpose()
    }

    async fn find_address_by_id(&self, id: Uuid) -> Result<Option<Address>, SelfServiceError> {
        let model = identity_addresses::Entity::find_by_id(id)
            .filter(identity_addresses::Column::Nid.eq(self.nid))
            .one(&self.db)
            .await
            .context("find address by id")?;
        model.map(address_from_model).transpose()
    }

    async fn get_identity(&self, id: Uuid) -> Result<Identity, SelfServiceError> {
        let model = identities::Entity::find_by_id(id)
            .filter(identities::Column::Nid.eq(self.nid))
            .one(&self.db)
            .await
            .context("get identity")?
            .with_context(|| format!("identity {id} not found"))?;
        Ok(Identity {
            id: model.id,
            nid: model.nid,
            traits: model.traits,
            created_at: model.created_at,
        })
    }

    async fn update_address(&self, address: &Address) -> Result<(), SelfServiceError> {
        identity_addresses::Entity::update_many()
            .col_expr(
                identity_addresses::Column::Verified,
                Expr::value(address.verified),
            )
            .col_expr(
                identity_addresses::Column::Status,
                Expr::value(address.status.as_str()),
            )
            .col_expr(
                identity_addresses::Column::VerifiedAt,
                Expr::value(address.verified_at),
            )
            .col_expr(
                identity_addresses::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(identity_addresses::Column::Id.eq(address.id))
            .filter(identity_addresses::Column::Nid.eq(self.nid))
            .exec(&self.db)
            .await
            .context("update address")?;
        Ok(())
    }
}

/// Emails are matched case-insensitively; phone numbers as given.
fn normalize_address(via: Channel, value: &str) -> String {
    match via {
        Channel::Email => value.trim().to_lowercase(),
        Channel::Phone => value.trim().to_owned(),
    }
}

fn address_from_model(model: identity_addresses::Model) -> Result<Address, SelfServiceError> {
    let kind = AddressKind::parse(&model.kind)
        .with_context(|| format!("unknown address kind {:?}", model.kind))?;
    let status = AddressStatus::parse(&model.status)
        .with_context(|| format!("unknown address status {:?}", model.status))?;
    Ok(Address {
        id: model.id,
        nid: model.nid,
        identity_id: model.identity_id,
        kind,
        via: model.via,
        value: model.value,
        verified: model.verified,
        status,
        verified_at: model.verified_at,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::config::FlowSettings;
use crate::domain::code::CodeGenerator;
use crate::infra::courier::{EmailCourier, SmsCourier};
use crate::infra::db::{DbCodeRepository, DbFlowRepository, DbIdentityRepository};
use crate::usecase::sender::CodeSender;

/// Shared application state passed to every handler via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    /// Network every query of this process is scoped to.
    pub nid: Uuid,
    pub generator: Arc<CodeGenerator>,
    pub settings: FlowSettings,
}

pub type DbCodeSender = CodeSender<DbCodeRepository, DbIdentityRepository, EmailCourier, SmsCourier>;

impl AppState {
    pub fn code_repo(&self) -> DbCodeRepository {
        DbCodeRepository {
            db: self.db.clone(),
            nid: self.nid,
            generator: self.generator.clone(),
        }
    }

    pub fn flow_repo(&self) -> DbFlowRepository {
        DbFlowRepository {
            db: self.db.clone(),
            nid: self.nid,
        }
    }

    pub fn identity_repo(&self) -> DbIdentityRepository {
        DbIdentityRepository {
            db: self.db.clone(),
            nid: self.nid,
        }
    }

    pub fn code_sender(&self) -> DbCodeSender {
        CodeSender {
            codes: self.code_repo(),
            identities: self.identity_repo(),
            email: EmailCourier {
                db: self.db.clone(),
                nid: self.nid,
            },
            sms: SmsCourier {
                db: self.db.clone(),
                nid: self.nid,
            },
            settings: self.settings.clone(),
        }
    }
}

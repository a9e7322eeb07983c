use anyhow::Context as _;
use chrono::Duration;
use url::Url;
use uuid::Uuid;

use crate::config::FlowSettings;
use crate::domain::repository::{CodeRepository, Dispatcher, IdentityPort};
use crate::domain::template::Template;
use crate::domain::types::{
    Address, AddressStatus, Channel, CreateCodeParams, Flow, FlowKind, append_path,
};
use crate::error::SelfServiceError;

/// Issues codes for known addresses and decoy messages for unknown ones.
///
/// Email templates go through `email`, SMS templates through `sms`.
pub struct CodeSender<C, I, E, S>
where
    C: CodeRepository,
    I: IdentityPort,
    E: Dispatcher,
    S: Dispatcher,
{
    pub codes: C,
    pub identities: I,
    pub email: E,
    pub sms: S,
    pub settings: FlowSettings,
}

impl<C, I, E, S> CodeSender<C, I, E, S>
where
    C: CodeRepository,
    I: IdentityPort,
    E: Dispatcher,
    S: Dispatcher,
{
    /// Send a recovery code to `to`. An address that belongs to no identity
    /// receives a "no account" notice and the call fails with `UnknownAddress`.
    pub async fn send_recovery_code(
        &self,
        flow: &Flow,
        channel: Channel,
        to: &str,
    ) -> Result<(), SelfServiceError> {
        tracing::debug!(flow_id = %flow.id, via = %channel, "preparing recovery code");

        let Some(address) = self
            .identities
            .find_address(FlowKind::Recovery, channel, to)
            .await?
        else {
            let template = Template::RecoveryCodeInvalid { to: to.to_owned() };
            self.dispatch(channel, &template).await?;
            return Err(SelfServiceError::UnknownAddress);
        };

        let via = address.channel()?;
        let identity = self.identities.get_identity(address.identity_id).await?;
        let issued = self
            .codes
            .create_code(FlowKind::Recovery, &self.code_params(flow, &address)?)
            .await?;

        let template = Template::RecoveryCodeValid {
            to: address.value.clone(),
            recovery_code: issued.raw,
            identity: identity.projection(),
        };
        let message_id = self.dispatch(via, &template).await?;

        tracing::info!(
            flow_id = %flow.id,
            identity_id = %identity.id,
            code_id = %issued.code.id,
            %message_id,
            %via,
            "queued recovery code"
        );
        Ok(())
    }

    /// Send a verification code to `to` and mark the address as sent.
    ///
    /// Unknown email addresses receive a decoy notice; unknown phone numbers
    /// receive nothing. Both fail with `UnknownAddress`.
    pub async fn send_verification_code(
        &self,
        flow: &Flow,
        channel: Channel,
        to: &str,
    ) -> Result<(), SelfServiceError> {
        tracing::debug!(flow_id = %flow.id, via = %channel, "preparing verification code");

        let Some(mut address) = self
            .identities
            .find_address(FlowKind::Verification, channel, to)
            .await?
        else {
            if channel == Channel::Email {
                let template = Template::VerificationCodeInvalid { to: to.to_owned() };
                self.dispatch(channel, &template).await?;
            }
            return Err(SelfServiceError::UnknownAddress);
        };

        let via = address.channel()?;
        let issued = self
            .codes
            .create_code(FlowKind::Verification, &self.code_params(flow, &address)?)
            .await?;
        let identity = self.identities.get_identity(address.identity_id).await?;

        let template = match via {
            Channel::Email => Template::VerificationCodeValid {
                to: address.value.clone(),
                verification_url: verification_link(&self.settings.public_url, flow.id, &issued.raw)
                    .to_string(),
                verification_code: issued.raw,
                identity: identity.projection(),
            },
            Channel::Phone => Template::VerificationCodeSms {
                to: address.value.clone(),
                code: issued.raw,
                identity: identity.projection(),
            },
        };
        let message_id = self.dispatch(via, &template).await?;

        tracing::info!(
            flow_id = %flow.id,
            identity_id = %identity.id,
            code_id = %issued.code.id,
            %message_id,
            %via,
            "queued verification code"
        );

        address.status = AddressStatus::Sent;
        self.identities.update_address(&address).await
    }

    async fn dispatch(&self, via: Channel, template: &Template) -> Result<Uuid, SelfServiceError> {
        match via {
            Channel::Email => self.email.dispatch(template).await,
            Channel::Phone => self.sms.dispatch(template).await,
        }
    }

    fn code_params(
        &self,
        flow: &Flow,
        address: &Address,
    ) -> Result<CreateCodeParams, SelfServiceError> {
        let expires_in = Duration::from_std(self.settings.code_lifespan)
            .context("code lifespan out of range")?;
        Ok(CreateCodeParams {
            flow_id: flow.id,
            identity_id: address.identity_id,
            address_id: address.id,
            expires_in,
        })
    }
}

/// `<public>/self-service/verification?flow=<id>&code=<raw>`
pub fn verification_link(public_url: &Url, flow_id: Uuid, raw: &str) -> Url {
    let mut url = append_path(public_url, &["self-service", "verification"]);
    url.query_pairs_mut()
        .append_pair("flow", &flow_id.to_string())
        .append_pair("code", raw);
    url
}

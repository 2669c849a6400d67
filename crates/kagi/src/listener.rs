//! Per-session negotiation: license request, license exchange and key
//! statuses evaluation.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::{
    cdm::{MediaKeyMessageType, MediaKeySession, MediaKeySessionEvent, MediaKeyStatus},
    config::{KeySystemOptions, LicenseConfig},
    error::{KagiError, KagiResult},
    init_data::{InitializationData, KeyId, KeyIdsUpdate},
    license::LicenseFetcher,
    util::backoff_delay,
};

/// Something a session listener reports to its manager.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// A recoverable issue.
    Warning(KagiError),
    /// The key statuses of the session were evaluated.
    KeyStatuses(KeyIdsUpdate),
    /// The negotiation ended with an error, possibly a
    /// [`KagiError::BlacklistedSession`].
    Error(KagiError),
}

/// Key statuses of a session sorted by decipherability.
#[derive(Debug, Default)]
pub struct KeyStatusesCheck {
    pub warnings: Vec<KagiError>,
    pub update: KeyIdsUpdate,
}

/// Sort the key statuses of a session into whitelisted and blacklisted key
/// ids, failing on statuses that can not be recovered from.
pub fn check_key_statuses(
    statuses: &[(KeyId, MediaKeyStatus)],
    options: &KeySystemOptions,
) -> KagiResult<KeyStatusesCheck> {
    let mut check = KeyStatusesCheck::default();
    for (key_id, status) in statuses {
        let key = hex::encode(key_id);
        match status {
            MediaKeyStatus::Expired => {
                let error = KagiError::KeyStatusChangeError(format!("key {key} expired"));
                if options.throw_on_license_expiration {
                    return Err(error);
                }
                check.warnings.push(error);
                check.update.whitelisted_key_ids.push(key_id.clone());
            }
            MediaKeyStatus::InternalError => {
                let error = KagiError::KeyStatusChangeError(format!(
                    "key {key} reported an internal error"
                ));
                if !options.fallback_on.key_internal_error {
                    return Err(error);
                }
                check.warnings.push(error);
                check.update.blacklisted_key_ids.push(key_id.clone());
            }
            MediaKeyStatus::OutputRestricted => {
                let error =
                    KagiError::KeyStatusChangeError(format!("key {key} output is restricted"));
                if !options.fallback_on.key_output_restricted {
                    return Err(error);
                }
                check.warnings.push(error);
                check.update.blacklisted_key_ids.push(key_id.clone());
            }
            _ => check.update.whitelisted_key_ids.push(key_id.clone()),
        }
    }
    Ok(check)
}

/// Reports the events of one session, tagged with the id of the
/// initialization data it handles.
#[derive(Clone)]
pub(crate) struct SessionEventSender {
    id: u64,
    sender: mpsc::UnboundedSender<(u64, SessionEvent)>,
}

impl SessionEventSender {
    pub fn new(id: u64, sender: mpsc::UnboundedSender<(u64, SessionEvent)>) -> Self {
        Self { id, sender }
    }

    fn send(&self, event: SessionEvent) {
        if self.sender.send((self.id, event)).is_err() {
            tracing::debug!("DRM: Session event dropped, the manager is gone");
        }
    }
}

/// Drives one session until it is closed or fails.
pub(crate) struct SessionListener<S, F> {
    pub session: Arc<S>,
    pub init_data: Arc<InitializationData>,
    /// Whether a license request has to be generated first.
    pub generate_request: bool,
    pub options: Arc<KeySystemOptions>,
    pub fetcher: F,
}

impl<S, F> SessionListener<S, F>
where
    S: MediaKeySession,
    F: LicenseFetcher,
{
    pub async fn run(self, sender: SessionEventSender) {
        if let Err(e) = self.listen(&sender).await {
            sender.send(SessionEvent::Error(e));
        }
    }

    async fn listen(&self, sender: &SessionEventSender) -> KagiResult<()> {
        let mut events = self.session.events();

        if !self.session.key_statuses().is_empty() {
            self.on_key_statuses_change(sender)?;
        }

        if self.generate_request {
            let data = self.init_data.concat_values();
            tracing::info!("DRM: Calling generateRequest on the MediaKeySession");
            self.session
                .generate_request(self.init_data.r#type.as_deref(), &data)
                .await
                .map_err(|e| KagiError::KeyGenerateRequestError(e.to_string()))?;
        }

        while let Some(event) = events.next().await {
            match event {
                MediaKeySessionEvent::Message {
                    message_type,
                    message,
                } => {
                    tracing::info!("DRM: Received message event, type {message_type:?}");
                    let Some(license) = self.fetch_license(&message, message_type, sender).await?
                    else {
                        tracing::info!("DRM: No license given, skipping session.update");
                        continue;
                    };
                    self.session
                        .update(&license)
                        .await
                        .map_err(|e| KagiError::KeyUpdateError(e.to_string()))?;
                    tracing::info!("DRM: session.update succeeded");
                }
                MediaKeySessionEvent::KeyStatusesChange => {
                    tracing::info!("DRM: keystatuseschange event received");
                    self.on_key_statuses_change(sender)?;
                }
            }
        }
        tracing::debug!("DRM: MediaKeySession events ended");
        Ok(())
    }

    fn on_key_statuses_change(&self, sender: &SessionEventSender) -> KagiResult<()> {
        let statuses = self.session.key_statuses();
        if statuses.is_empty() {
            return Ok(());
        }
        let check = check_key_statuses(&statuses, &self.options)?;
        for warning in check.warnings {
            sender.send(SessionEvent::Warning(warning));
        }
        sender.send(SessionEvent::KeyStatuses(check.update));
        Ok(())
    }

    async fn fetch_license(
        &self,
        message: &[u8],
        message_type: MediaKeyMessageType,
        sender: &SessionEventSender,
    ) -> KagiResult<Option<Bytes>> {
        fetch_license_with_retry(&self.fetcher, message, message_type, &self.options.license, |e| {
            sender.send(SessionEvent::Warning(e))
        })
        .await
    }
}

/// Ask `fetcher` for a license, retrying `config.retry` times with an
/// exponential backoff. Each failed attempt but the last one is given to
/// `on_retry`.
pub async fn fetch_license_with_retry<F: LicenseFetcher>(
    fetcher: &F,
    message: &[u8],
    message_type: MediaKeyMessageType,
    config: &LicenseConfig,
    mut on_retry: impl FnMut(KagiError),
) -> KagiResult<Option<Bytes>> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result =
            tokio::time::timeout(config.timeout(), fetcher.get_license(message, message_type))
                .await;
        let error = match result {
            Ok(Ok(license)) => return Ok(license),
            Ok(Err(e)) => KagiError::LicenseRequestError(e.to_string()),
            Err(_) => KagiError::LicenseRequestError(format!(
                "timed out after {}ms",
                config.timeout().as_millis()
            )),
        };

        if attempt > config.retry {
            tracing::error!("DRM: License request failed after {attempt} attempt(s): {error}");
            if config.fallback_on_last_try {
                return Err(KagiError::BlacklistedSession(Box::new(error)));
            }
            return Err(error);
        }

        let delay = backoff_delay(attempt);
        tracing::warn!(
            "DRM: License request failed, retrying in {}ms. {error}",
            delay.as_millis()
        );
        on_retry(error);
        tokio::time::sleep(delay).await;
    }
}

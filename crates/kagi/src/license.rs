use std::{future::Future, sync::Arc};

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use url::Url;

use crate::{
    cdm::MediaKeyMessageType,
    error::{KagiError, KagiResult},
    util::http::HttpClient,
};

/// Exchanges CDM challenges with a license server.
pub trait LicenseFetcher: Send + Sync + 'static {
    /// Fetch the license answering `message`.
    ///
    /// Resolving to `None` means no update should be made on the session.
    fn get_license(
        &self,
        message: &[u8],
        message_type: MediaKeyMessageType,
    ) -> impl Future<Output = KagiResult<Option<Bytes>>> + Send;
}

impl<F> LicenseFetcher for Arc<F>
where
    F: LicenseFetcher,
{
    fn get_license(
        &self,
        message: &[u8],
        message_type: MediaKeyMessageType,
    ) -> impl Future<Output = KagiResult<Option<Bytes>>> + Send {
        self.as_ref().get_license(message, message_type)
    }
}

/// POSTs every challenge to a single license server url.
#[derive(Clone)]
pub struct HttpLicenseFetcher {
    client: HttpClient,
    url: Url,
    headers: HeaderMap,
}

impl HttpLicenseFetcher {
    pub fn new(client: HttpClient, url: &str) -> KagiResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        Ok(Self {
            client,
            url: Url::parse(url)?,
            headers,
        })
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }
}

impl LicenseFetcher for HttpLicenseFetcher {
    async fn get_license(
        &self,
        message: &[u8],
        message_type: MediaKeyMessageType,
    ) -> KagiResult<Option<Bytes>> {
        tracing::debug!("DRM: Requesting license ({message_type:?}) from {}", self.url);
        let response = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .body(message.to_vec())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(KagiError::HttpError(response.status()));
        }

        let license = response.bytes().await?;
        if license.is_empty() {
            return Ok(None);
        }
        Ok(Some(license))
    }
}

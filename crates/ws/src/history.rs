use std::sync::Arc;

use chatwire_protocol::{
    HistoryError, HistoryQuery, HistoryRecord, HistorySource, decode_history,
};
use mime::Mime;
use reqwest::{Client, Url, header};

use crate::config::HistoryConfig;

/// A [`HistorySource`] backed by the HTTP history endpoint.
///
/// The request is a `GET <base_url>?userId=..&allowTime=..`, carrying the
/// access token as a bearer credential. The response must be JSON.
#[derive(Clone, Debug)]
pub struct HttpHistorySource {
    client: Client,
    config: Arc<HistoryConfig>,
}

impl HttpHistorySource {
    /// Creates a new `HttpHistorySource` with the given configuration.
    #[inline]
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl HistorySource for HttpHistorySource {
    fn fetch(
        &self,
        query: &HistoryQuery,
    ) -> impl Future<Output = Result<Vec<HistoryRecord>, HistoryError>>
    + Send
    + 'static {
        let url = Url::parse_with_params(
            &self.config.base_url,
            &[
                ("userId", query.user_id.as_str()),
                ("allowTime", query.allow_time.as_str()),
            ],
        );
        let resp_fut = url.map(|url| {
            let mut req = self
                .client
                .get(url)
                .header(header::ACCEPT, "application/json");
            if let Some(token) = &self.config.access_token {
                req = req.bearer_auth(token);
            }
            req.send()
        });

        async move {
            let resp_fut = resp_fut.map_err(|err| {
                HistoryError::network()
                    .with_reason(format!("invalid history URL: {err}"))
            })?;
            let resp = resp_fut.await.map_err(|err| {
                HistoryError::network().with_reason(err.to_string())
            })?;

            let status = resp.status();
            if !status.is_success() {
                return Err(
                    HistoryError::status().with_reason(format!("HTTP {status}"))
                );
            }

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_json = content_type
                .and_then(|v| v.parse().ok())
                .is_some_and(|m: Mime| {
                    m.type_() == mime::APPLICATION && m.subtype() == mime::JSON
                });
            if !is_json {
                return Err(HistoryError::malformed().with_reason(format!(
                    "unexpected content type: {content_type:?}"
                )));
            }

            let body = resp.bytes().await.map_err(|err| {
                HistoryError::network().with_reason(err.to_string())
            })?;
            let records = decode_history(&body)?;
            debug!("fetched {} history records", records.len());
            Ok(records)
        }
    }
}

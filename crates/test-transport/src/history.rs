use std::future::Future;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chatwire_protocol::{
    CorrelationId, HistoryError, HistoryQuery, HistoryRecord, HistorySource,
};
use tokio::time::sleep;

/// Builds a history record for a user turn and its optional reply.
pub fn history_record(
    request_time: &str,
    request_id: &str,
    body: &str,
    reply: Option<&str>,
) -> HistoryRecord {
    HistoryRecord {
        request_time: request_time.to_owned(),
        request_id: CorrelationId::from(request_id),
        r#type: "text".to_owned(),
        body: body.to_owned(),
        msg: reply.map(ToOwned::to_owned),
    }
}

/// A local fake history endpoint for testing purpose.
#[derive(Clone)]
pub struct TestHistorySource {
    result: Result<Vec<HistoryRecord>, HistoryError>,
    delay: Option<Duration>,
    queries: Arc<Mutex<Vec<HistoryQuery>>>,
    fetches: Arc<AtomicUsize>,
}

impl TestHistorySource {
    /// A source that answers with `records`.
    #[inline]
    pub fn with_records(records: Vec<HistoryRecord>) -> Self {
        Self::with_result(Ok(records))
    }

    /// A source that always fails with `error`.
    #[inline]
    pub fn failing(error: HistoryError) -> Self {
        Self::with_result(Err(error))
    }

    fn with_result(result: Result<Vec<HistoryRecord>, HistoryError>) -> Self {
        Self {
            result,
            delay: None,
            queries: Default::default(),
            fetches: Default::default(),
        }
    }

    /// Delays every answer by `delay`.
    #[inline]
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = Some(delay);
    }

    /// Returns how many times the source has been queried.
    #[inline]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Returns every query received so far.
    pub fn queries(&self) -> Vec<HistoryQuery> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }
}

impl HistorySource for TestHistorySource {
    fn fetch(
        &self,
        query: &HistoryQuery,
    ) -> impl Future<Output = Result<Vec<HistoryRecord>, HistoryError>>
    + Send
    + 'static {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.clone());
        }
        let result = self.result.clone();
        let delay = self.delay;
        async move {
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            result
        }
    }
}

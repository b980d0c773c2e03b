use std::pin::Pin;
use std::sync::Arc;

use chatwire_protocol::{
    HistoryError, HistoryQuery, HistoryRecord, HistorySource,
};
use tracing::Instrument;

pub(crate) type FetchResult = Result<Vec<HistoryRecord>, HistoryError>;
type BoxedFetchFuture = Pin<Box<dyn Future<Output = FetchResult> + Send>>;
type FetchFn = Arc<dyn Fn(HistoryQuery) -> BoxedFetchFuture + Send + Sync>;

/// A wrapper around a history source that provides a type-erased
/// interface for the session.
#[derive(Clone)]
pub struct HistoryClient {
    fetch_fn: FetchFn,
}

impl HistoryClient {
    #[inline]
    pub fn new<S: HistorySource + 'static>(source: S) -> Self {
        // Erase `S` so that the session doesn't need a generic parameter.
        let fetch_fn: FetchFn = Arc::new(move |query| {
            let fut = source.fetch(&query);
            Box::pin(
                async move {
                    trace!("fetching history for {}", query.user_id);
                    let result = fut.await;
                    match &result {
                        Ok(records) => {
                            debug!("got {} history records", records.len())
                        }
                        Err(err) => warn!("history fetch failed: {err}"),
                    }
                    result
                }
                .instrument(trace_span!("history fetch")),
            )
        });
        Self { fetch_fn }
    }

    /// A client with nothing to backfill.
    #[inline]
    pub fn empty() -> Self {
        let fetch_fn: FetchFn =
            Arc::new(|_| Box::pin(std::future::ready(Ok(vec![]))));
        Self { fetch_fn }
    }

    /// Fetches the history.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe.
    #[inline]
    pub async fn fetch(&self, query: HistoryQuery) -> FetchResult {
        (self.fetch_fn)(query).await
    }
}

//! Cursor pagination
//!
//! A [`Paginator`] starts at cursor `-1` and follows `next_cursor` until the
//! server answers `0`. Pages are fetched only when asked for, so dropping the
//! paginator early costs nothing beyond the pages already fetched.

use crate::api::client::{ApiClient, ApiRequest, Fetched};
use crate::api::ApiResult;
use serde_json::Value;

/// Cursor value asking for the first page
pub const FIRST_CURSOR: i64 = -1;
/// Cursor value signalling that there are no more pages
pub const LAST_CURSOR: i64 = 0;

pub struct Paginator<'a> {
    client: &'a ApiClient,
    request: ApiRequest,
    cursor: i64,
    finished: bool,
    pages: usize,
}

impl<'a> Paginator<'a> {
    pub(crate) fn new(client: &'a ApiClient, request: ApiRequest) -> Self {
        Self {
            client,
            request,
            cursor: FIRST_CURSOR,
            finished: false,
            pages: 0,
        }
    }

    /// Fetch the next page
    ///
    /// Returns `Ok(None)` once the last page has been yielded. A throttled
    /// page ends the iteration.
    ///
    /// # Errors
    ///
    /// Propagates the client's errors; the paginator is finished afterwards.
    pub async fn next_page(&mut self) -> ApiResult<Option<Fetched<Value>>> {
        if self.finished {
            return Ok(None);
        }

        self.request.set_param("cursor", self.cursor);
        let outcome = match self.client.call(&self.request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        match &outcome {
            Fetched::Ready(body) => {
                let next = body
                    .get("next_cursor")
                    .and_then(Value::as_i64)
                    .unwrap_or(LAST_CURSOR);
                if next == LAST_CURSOR {
                    self.finished = true;
                } else {
                    self.cursor = next;
                }
                self.pages += 1;
            }
            Fetched::Throttled { .. } => self.finished = true,
        }

        Ok(Some(outcome))
    }

    /// Pages yielded so far
    #[must_use]
    pub fn pages(&self) -> usize {
        self.pages
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

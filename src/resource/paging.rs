//! Pagination Controller
//!
//! After the first page of a read arrives, decides whether more requests
//! are needed and, if so, runs them concurrently and commits the combined
//! result as a single fetch success.

use super::action::{ActionKind, Failure, ResponseMeta};
use super::fetcher::{extract_records, FetchOutcome};
use super::options::OptionSet;
use super::registry::{Verb, DEFAULT_PER_REQUEST};
use super::url::url_from_options;
use super::{RestResource, Sent};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;

/// Query parameter carrying the page offset when none is configured
pub const DEFAULT_OFFSET_PARAM: &str = "offset";

/// Largest offset a non-accumulating resource will splice at, since the
/// slots before it are filled with holes
pub const MAX_SPARSE_OFFSET: u64 = 100_000;

/// How a read continues after its first page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagingPlan {
    /// The first page is the whole result
    Single,
    /// Fetch one page at this offset and splice it into existing records
    Offset(u64),
    /// Fetch the remaining pages at these offsets
    Pages(Vec<u64>),
}

/// Decide how to continue a read given the first page's declared `total`
pub fn plan_paging(
    total: Option<u64>,
    records_required: Option<u64>,
    result_offset: Option<u64>,
    per_request: u64,
) -> PagingPlan {
    let Some(total) = total else {
        return PagingPlan::Single;
    };
    if total <= per_request || per_request == 0 {
        return PagingPlan::Single;
    }

    // in offset mode the requested count is the offset itself
    if let Some(offset) = result_offset.filter(|o| *o > 0) {
        if offset <= per_request {
            return PagingPlan::Single;
        }
        return PagingPlan::Offset(offset.min(total));
    }

    let Some(required) = records_required.filter(|r| *r > per_request) else {
        return PagingPlan::Single;
    };

    let limit = required.min(total);
    PagingPlan::Pages(
        (1..)
            .map(|page| page * per_request)
            .take_while(|offset| *offset < limit)
            .collect(),
    )
}

/// URL of the page starting at `offset`
pub fn page_url(options: &OptionSet, offset: u64) -> Option<String> {
    let mut page = options.clone();
    let name = options
        .offset_param
        .clone()
        .unwrap_or_else(|| DEFAULT_OFFSET_PARAM.to_string());
    page.params.as_mut()?.insert(name, Value::from(offset));
    url_from_options(&page, None)
}

/// One page of a paging session
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub url: String,
    pub offset: u64,
    /// `None` until the page has arrived
    pub records: Option<Vec<Value>>,
    /// Total declared by this page's response
    pub total: Option<u64>,
}

impl Page {
    pub fn is_complete(&self) -> bool {
        self.records.is_some()
    }
}

/// Pages of one multi-page read, keyed by offset
#[derive(Debug, Default)]
pub struct PagingSession {
    pages: BTreeMap<u64, Page>,
}

impl PagingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, offset: u64, url: &str) {
        self.pages.entry(offset).or_insert_with(|| Page {
            url: url.to_string(),
            offset,
            records: None,
            total: None,
        });
    }

    /// Store a page's records.
    ///
    /// A page whose declared total is zero, or does not reach past its own
    /// offset, is miscounted: it completes without contributing records.
    /// Returns whether the records were kept.
    pub fn complete(
        &mut self,
        offset: u64,
        records: Vec<Value>,
        declared_total: Option<u64>,
    ) -> bool {
        let miscounted = match declared_total {
            Some(0) => true,
            Some(total) => offset > 0 && total <= offset,
            None => false,
        };
        let page = self.pages.entry(offset).or_insert_with(|| Page {
            url: String::new(),
            offset,
            records: None,
            total: None,
        });
        page.records = Some(if miscounted { Vec::new() } else { records });
        page.total = declared_total;
        !miscounted
    }

    pub fn page(&self, offset: u64) -> Option<&Page> {
        self.pages.get(&offset)
    }

    pub fn is_complete(&self) -> bool {
        self.pages.values().all(Page::is_complete)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// All records in offset order
    pub fn into_records(self) -> Vec<Value> {
        self.pages
            .into_values()
            .filter_map(|page| page.records)
            .flatten()
            .collect()
    }
}

/// Result of fetching one extra page
enum PageResult {
    Loaded {
        offset: u64,
        url: String,
        records: Vec<Value>,
        total: Option<u64>,
    },
    Failed(Failure),
    Aborted,
}

impl RestResource {
    /// Continue a read whose first page has arrived
    pub(crate) async fn paginate(
        &self,
        options: &OptionSet,
        url: &str,
        first: Vec<Value>,
        response: ResponseMeta,
    ) -> FetchOutcome {
        let per_request = options.per_request.unwrap_or(DEFAULT_PER_REQUEST);
        let plan = plan_paging(
            response.total_records,
            options.records_required,
            options.result_offset,
            per_request,
        );
        tracing::debug!("{}: paging plan {:?}", self.def.name, plan);

        match plan {
            PagingPlan::Single => {
                if std::mem::take(&mut self.tracker().paged) {
                    self.dispatch(ActionKind::PagingReset, self.meta(options.path.as_deref()));
                }
                self.commit(options, first, response, None)
            }
            PagingPlan::Offset(offset) => self.fetch_offset(options, url, offset, response).await,
            PagingPlan::Pages(offsets) => {
                self.fetch_pages(options, url, first, response, offsets).await
            }
        }
    }

    fn commit(
        &self,
        options: &OptionSet,
        records: Vec<Value>,
        response: ResponseMeta,
        offset: Option<u64>,
    ) -> FetchOutcome {
        let mut meta = self.meta(options.path.as_deref());
        meta.offset = offset;
        tracing::info!("{}: loaded {} record(s)", self.def.name, records.len());
        self.dispatch(
            ActionKind::FetchSuccess {
                records: records.clone(),
                response,
            },
            meta,
        );
        FetchOutcome::Loaded(records)
    }

    /// Fetch a single page at `offset` and splice it into existing records
    async fn fetch_offset(
        &self,
        options: &OptionSet,
        base_url: &str,
        offset: u64,
        response: ResponseMeta,
    ) -> FetchOutcome {
        if !self.def.accumulate && offset > MAX_SPARSE_OFFSET {
            let failure = Failure::transport(format!(
                "offset {} is beyond the sparse limit of {}",
                offset, MAX_SPARSE_OFFSET
            ));
            return self.fail_read(base_url, options.path.as_deref(), failure);
        }

        let Some(url) = page_url(options, offset) else {
            return self.commit(options, Vec::new(), response, Some(offset));
        };

        {
            let mut tracker = self.tracker();
            let repeated = tracker.last_offset.as_ref() == Some(&(url.clone(), offset));
            if repeated && self.def.accumulate {
                drop(tracker);
                tracing::debug!("{}: offset {} already appended", self.def.name, offset);
                return self.commit(options, Vec::new(), response, Some(offset));
            }
            tracker.last_offset = Some((url.clone(), offset));
        }

        match self.fetch_page(options, offset, url).await {
            PageResult::Loaded { records, total, .. } => {
                if !self.is_current(base_url) {
                    return FetchOutcome::Stale;
                }
                let response = ResponseMeta {
                    total_records: total.or(response.total_records),
                    ..response
                };
                self.commit(options, records, response, Some(offset))
            }
            PageResult::Failed(failure) => {
                self.fail_read(base_url, options.path.as_deref(), failure)
            }
            PageResult::Aborted => {
                self.abort_read(options.path.as_deref(), super::ABORT_MESSAGE.to_string())
            }
        }
    }

    /// Fetch the remaining pages concurrently and commit them with the first
    async fn fetch_pages(
        &self,
        options: &OptionSet,
        base_url: &str,
        first: Vec<Value>,
        response: ResponseMeta,
        offsets: Vec<u64>,
    ) -> FetchOutcome {
        let path = options.path.as_deref();
        self.tracker().paged = true;
        self.dispatch(ActionKind::PagingStart, self.meta(path));

        let mut session = PagingSession::new();
        session.start(0, base_url);
        self.dispatch(ActionKind::PageStart { url: base_url.to_string() }, self.meta(path));

        let mut pending = FuturesUnordered::new();
        for offset in offsets {
            let Some(url) = page_url(options, offset) else {
                continue;
            };
            session.start(offset, &url);
            self.dispatch(ActionKind::PageStart { url: url.clone() }, self.meta(path));
            pending.push(self.fetch_page(options, offset, url));
        }
        tracing::info!("{}: fetching {} page(s)", self.def.name, session.len());

        session.complete(0, first, response.total_records);
        self.dispatch(ActionKind::PageSuccess { url: base_url.to_string() }, self.meta(path));

        while let Some(result) = pending.next().await {
            match result {
                PageResult::Loaded {
                    offset,
                    url,
                    records,
                    total,
                } => {
                    if !session.complete(offset, records, total) {
                        tracing::warn!(
                            "{}: page at offset {} reported total {:?}",
                            self.def.name,
                            offset,
                            total
                        );
                    }
                    self.dispatch(ActionKind::PageSuccess { url }, self.meta(path));
                }
                PageResult::Failed(failure) => return self.fail_read(base_url, path, failure),
                PageResult::Aborted => {
                    return self.abort_read(path, super::ABORT_MESSAGE.to_string())
                }
            }
        }

        if !self.is_current(base_url) {
            tracing::warn!("{}: discarding stale pages for {}", self.def.name, base_url);
            return FetchOutcome::Stale;
        }

        self.tracker().paged = false;
        self.commit(options, session.into_records(), response, None)
    }

    async fn fetch_page(&self, options: &OptionSet, offset: u64, url: String) -> PageResult {
        let response = match self.send(&url, Verb::Get, &url, &options.headers, None).await {
            Sent::Response(response) => response,
            Sent::Aborted => return PageResult::Aborted,
            Sent::Failed(err) => {
                return PageResult::Failed(Failure::transport(format!("{:#}", err)))
            }
        };

        if response.is_error() {
            return PageResult::Failed(Failure::http(response.status, &response.body));
        }

        let body = match response.json() {
            Ok(body) => body,
            Err(err) => return PageResult::Failed(Failure::transport(format!("{:#}", err))),
        };

        match extract_records(&body, options.records.as_deref(), self.def.allow_undefined_records) {
            Ok(page) => PageResult::Loaded {
                offset,
                url,
                records: page.records,
                total: page.total,
            },
            Err(failure) => PageResult::Failed(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_single_page_cases() {
        assert_eq!(plan_paging(None, Some(100), None, 5), PagingPlan::Single);
        assert_eq!(plan_paging(Some(4), Some(100), None, 5), PagingPlan::Single);
        assert_eq!(plan_paging(Some(100), None, None, 5), PagingPlan::Single);
        assert_eq!(plan_paging(Some(100), Some(5), None, 5), PagingPlan::Single);
        assert_eq!(
            plan_paging(Some(100), Some(20), Some(0), 5),
            PagingPlan::Pages(vec![5, 10, 15])
        );
    }

    #[test]
    fn test_plan_pages_bounded_by_total() {
        assert_eq!(plan_paging(Some(14), Some(20), None, 5), PagingPlan::Pages(vec![5, 10]));
        assert_eq!(plan_paging(Some(100), Some(12), None, 5), PagingPlan::Pages(vec![5, 10]));
    }

    #[test]
    fn test_plan_offset_mode() {
        assert_eq!(plan_paging(Some(100), None, Some(40), 20), PagingPlan::Offset(40));
        assert_eq!(plan_paging(Some(30), Some(10), Some(80), 20), PagingPlan::Offset(30));
    }

    #[test]
    fn test_plan_offset_within_first_page_is_single() {
        assert_eq!(plan_paging(Some(20), None, Some(3), 5), PagingPlan::Single);
        assert_eq!(plan_paging(Some(20), None, Some(5), 5), PagingPlan::Single);
        assert_eq!(plan_paging(Some(20), None, Some(6), 5), PagingPlan::Offset(6));
        assert_eq!(plan_paging(Some(4), None, Some(40), 5), PagingPlan::Single);
    }

    #[test]
    fn test_page_url_adds_offset() {
        let mut options = OptionSet::with_path("users");
        options.root = Some("http://h".to_string());
        options.params = Some(BTreeMap::from([("limit".to_string(), json!(5))]));
        assert_eq!(page_url(&options, 10).as_deref(), Some("http://h/users?limit=5&offset=10"));

        options.offset_param = Some("start".to_string());
        assert_eq!(page_url(&options, 10).as_deref(), Some("http://h/users?limit=5&start=10"));

        options.params = None;
        assert_eq!(page_url(&options, 10), None);
    }

    #[test]
    fn test_session_concatenates_in_offset_order() {
        let mut session = PagingSession::new();
        session.start(0, "/u");
        session.start(5, "/u?offset=5");
        session.start(10, "/u?offset=10");
        assert!(!session.is_complete());
        assert_eq!(session.page(5).map(|p| p.url.as_str()), Some("/u?offset=5"));

        session.complete(10, vec![json!(10)], Some(11));
        session.complete(0, vec![json!(0), json!(1)], Some(11));
        assert!(!session.is_complete());
        session.complete(5, vec![json!(5)], Some(11));
        assert!(session.is_complete());
        assert_eq!(session.into_records(), vec![json!(0), json!(1), json!(5), json!(10)]);
    }

    #[test]
    fn test_session_miscounted_page_completes_empty() {
        let mut session = PagingSession::new();
        session.start(0, "/u");
        session.start(5, "/u?offset=5");
        assert!(session.complete(0, vec![json!(0)], Some(10)));
        assert!(!session.complete(5, vec![json!(5)], Some(0)));
        assert!(session.is_complete());
        assert_eq!(session.page(5).and_then(|p| p.records.clone()), Some(vec![]));
        assert_eq!(session.into_records(), vec![json!(0)]);

        let mut session = PagingSession::new();
        session.start(10, "/u?offset=10");
        assert!(!session.complete(10, vec![json!(1)], Some(10)));
        assert!(session.into_records().is_empty());
    }
}

//! Infinite (paged) queries.
//!
//! An infinite query caches an [`InfiniteData`] — the fetched pages plus the
//! parameter each page was fetched with. The page behavior installs itself as
//! a fetch override on the query: instead of one request, the replacement
//! fetch drives a page loop that fetches the first page, extends forward or
//! backward, or refetches the existing pages in order, reusing cached pages
//! that were not selected for refetch. Aborting the fetch stops the loop at
//! the next page boundary.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::abort::AbortSignal;
use crate::client::QueryClient;
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::observer::{ObserverSubscription, QueryObserver, QueryObserverResult};
use crate::options::{
    FetchDirection, FetchMore, FetchOptions, QueryData, QueryFn, QueryFnContext,
    QueryObserverOptions, QueryOptions,
};
use crate::query::{FetchContext, QueryBehavior};

/// Pages of a paged query with the parameter each page was fetched with.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct InfiniteData<T> {
    pub pages: Vec<T>,
    pub page_params: Vec<Option<Value>>,
}

impl<T> InfiniteData<T> {
    #[must_use]
    pub fn new(pages: Vec<T>, page_params: Vec<Option<Value>>) -> Self {
        Self { pages, page_params }
    }
}

impl<T> Default for InfiniteData<T> {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            page_params: Vec::new(),
        }
    }
}

impl<T> std::fmt::Debug for InfiniteData<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfiniteData")
            .field("pages", &self.pages.len())
            .field("page_params", &self.page_params)
            .finish()
    }
}

/// Computes the parameter of the page adjacent to a boundary page.
pub type GetPageParamFn<T> = Arc<dyn Fn(&T, &[T]) -> Option<Value> + Send + Sync>;

/// Selects which pages a refetch actually refetches.
pub type RefetchPageFn<T> = Arc<dyn Fn(&T, usize, &[T]) -> bool + Send + Sync>;

/// A page parameter of `null` or `false` means "no such page".
fn page_param_valid(param: &Option<Value>) -> bool {
    !matches!(param, None | Some(Value::Null) | Some(Value::Bool(false)))
}

/// Page-level configuration of an infinite query.
pub struct InfinitePageConfig<TPage: QueryData> {
    pub query_fn: Option<QueryFn<TPage>>,
    pub get_next_page_param: Option<GetPageParamFn<TPage>>,
    pub get_previous_page_param: Option<GetPageParamFn<TPage>>,
}

impl<TPage: QueryData> Clone for InfinitePageConfig<TPage> {
    fn clone(&self) -> Self {
        Self {
            query_fn: self.query_fn.clone(),
            get_next_page_param: self.get_next_page_param.clone(),
            get_previous_page_param: self.get_previous_page_param.clone(),
        }
    }
}

impl<TPage: QueryData> Default for InfinitePageConfig<TPage> {
    fn default() -> Self {
        Self {
            query_fn: None,
            get_next_page_param: None,
            get_previous_page_param: None,
        }
    }
}

impl<TPage: QueryData> InfinitePageConfig<TPage> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The per-page fetcher; receives the page parameter on its context.
    #[must_use]
    pub fn query_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueryFnContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TPage, QueryError>> + Send + 'static,
    {
        self.query_fn = Some(Arc::new(move |ctx| f(ctx).boxed()));
        self
    }

    #[must_use]
    pub fn get_next_page_param(
        mut self,
        f: impl Fn(&TPage, &[TPage]) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.get_next_page_param = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn get_previous_page_param(
        mut self,
        f: impl Fn(&TPage, &[TPage]) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.get_previous_page_param = Some(Arc::new(f));
        self
    }

    /// Installs the page behavior on entry-level options.
    #[must_use]
    pub fn install(
        &self,
        mut options: QueryOptions<InfiniteData<TPage>>,
    ) -> QueryOptions<InfiniteData<TPage>> {
        options.behavior = Some(Arc::new(InfiniteQueryBehavior {
            config: self.clone(),
        }));
        options
    }

    fn next_page_param(&self, last: Option<&TPage>, pages: &[TPage]) -> Option<Value> {
        let getter = self.get_next_page_param.as_ref()?;
        let param = Some(getter(last?, pages)?);
        page_param_valid(&param).then(|| param.expect("checked above"))
    }

    fn previous_page_param(&self, first: Option<&TPage>, pages: &[TPage]) -> Option<Value> {
        let getter = self.get_previous_page_param.as_ref()?;
        let param = Some(getter(first?, pages)?);
        page_param_valid(&param).then(|| param.expect("checked above"))
    }
}

impl<TPage: QueryData> std::fmt::Debug for InfinitePageConfig<TPage> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfinitePageConfig")
            .field("has_next_getter", &self.get_next_page_param.is_some())
            .field("has_previous_getter", &self.get_previous_page_param.is_some())
            .finish_non_exhaustive()
    }
}

/// The fetch override turning a single-shot fetch into a page loop.
pub(crate) struct InfiniteQueryBehavior<TPage: QueryData> {
    config: InfinitePageConfig<TPage>,
}

impl<TPage: QueryData> QueryBehavior<InfiniteData<TPage>> for InfiniteQueryBehavior<TPage> {
    fn on_fetch(&self, context: &mut FetchContext<InfiniteData<TPage>>) {
        let config = self.config.clone();
        let old = context.state.data.clone();
        let fetch_more = context.fetch_options.fetch_more.clone();
        let refetch_page: Option<RefetchPageFn<TPage>> = context
            .fetch_options
            .refetch_page
            .clone()
            .and_then(|any: Arc<dyn Any + Send + Sync>| {
                any.downcast::<RefetchPageFn<TPage>>().ok()
            })
            .map(|arc| (*arc).clone());
        let key = context.key.clone();
        let meta = context.options.meta.clone();
        let signal = context.signal.clone();
        let consumed = context.signal_consumed.clone();

        context.fetch_fn = Arc::new(move || {
            let config = config.clone();
            let old = old.clone();
            let fetch_more = fetch_more.clone();
            let refetch_page = refetch_page.clone();
            let key = key.clone();
            let meta = meta.clone();
            let signal = signal.clone();
            let consumed = consumed.clone();
            async move {
                page_loop(
                    config,
                    old,
                    fetch_more,
                    refetch_page,
                    key,
                    meta,
                    signal,
                    consumed,
                )
                .await
            }
            .boxed()
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn page_loop<TPage: QueryData>(
    config: InfinitePageConfig<TPage>,
    old: Option<Arc<InfiniteData<TPage>>>,
    fetch_more: Option<FetchMore>,
    refetch_page: Option<RefetchPageFn<TPage>>,
    key: QueryKey,
    meta: Option<Arc<Value>>,
    signal: AbortSignal,
    consumed: Arc<AtomicBool>,
) -> Result<InfiniteData<TPage>, QueryError> {
    let old_pages: Vec<TPage> = old.as_ref().map(|d| d.pages.clone()).unwrap_or_default();
    let old_params: Vec<Option<Value>> = old
        .as_ref()
        .map(|d| d.page_params.clone())
        .unwrap_or_default();

    let fetch_page = |param: Option<Value>| {
        let query_fn = config.query_fn.clone();
        let context = QueryFnContext::new(
            key.clone(),
            meta.clone(),
            param,
            signal.clone(),
            consumed.clone(),
        );
        async move {
            match query_fn {
                Some(query_fn) => query_fn(context).await,
                None => Err(QueryError::MissingQueryFn),
            }
        }
    };

    match fetch_more {
        Some(more) if more.direction == FetchDirection::Forward => {
            let param = match more.page_param {
                Some(param) => Some(param),
                None => config.next_page_param(old_pages.last(), &old_pages),
            };
            if !page_param_valid(&param) {
                return Ok(InfiniteData::new(old_pages, old_params));
            }
            let page = fetch_page(param.clone()).await?;
            let mut pages = old_pages;
            let mut params = old_params;
            pages.push(page);
            params.push(param);
            Ok(InfiniteData::new(pages, params))
        }
        Some(more) => {
            let param = match more.page_param {
                Some(param) => Some(param),
                None => config.previous_page_param(old_pages.first(), &old_pages),
            };
            if !page_param_valid(&param) {
                return Ok(InfiniteData::new(old_pages, old_params));
            }
            let page = fetch_page(param.clone()).await?;
            let mut pages = old_pages;
            let mut params = old_params;
            pages.insert(0, page);
            params.insert(0, param);
            Ok(InfiniteData::new(pages, params))
        }
        None if old_pages.is_empty() => {
            // First load: one page with no parameter.
            let page = fetch_page(None).await?;
            Ok(InfiniteData::new(vec![page], vec![None]))
        }
        None => {
            // Refetch: walk the existing pages in order. Without a
            // next-page getter, parameters are "manual" and reused as
            // stored instead of recomputed.
            let manual = config.get_next_page_param.is_none();
            let mut pages: Vec<TPage> = Vec::with_capacity(old_pages.len());
            let mut params: Vec<Option<Value>> = Vec::with_capacity(old_pages.len());
            for (index, old_page) in old_pages.iter().enumerate() {
                if signal.aborted() {
                    return Err(QueryError::cancelled());
                }
                let should = refetch_page
                    .as_ref()
                    .is_none_or(|selector| selector(old_page, index, &old_pages));
                let stored_param = old_params.get(index).cloned().unwrap_or(None);
                if should {
                    let param = if index == 0 || manual {
                        stored_param
                    } else {
                        config.next_page_param(pages.last(), &pages)
                    };
                    pages.push(fetch_page(param.clone()).await?);
                    params.push(param);
                } else {
                    pages.push(old_page.clone());
                    params.push(stored_param);
                }
            }
            Ok(InfiniteData::new(pages, params))
        }
    }
}

/// Observer result with the paging projections layered on.
#[derive(Clone)]
pub struct InfiniteQueryObserverResult<TPage> {
    pub base: QueryObserverResult<InfiniteData<TPage>>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub is_fetching_next_page: bool,
    pub is_fetching_previous_page: bool,
}

impl<TPage> InfiniteQueryObserverResult<TPage> {
    #[must_use]
    pub fn data(&self) -> Option<&Arc<InfiniteData<TPage>>> {
        self.base.data.as_ref()
    }

    /// Background refetching, excluding forward/backward page fetches.
    #[must_use]
    pub fn is_refetching(&self) -> bool {
        self.base.is_refetching() && !self.is_fetching_next_page && !self.is_fetching_previous_page
    }
}

impl<TPage> std::fmt::Debug for InfiniteQueryObserverResult<TPage> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfiniteQueryObserverResult")
            .field("base", &self.base)
            .field("has_next_page", &self.has_next_page)
            .field("has_previous_page", &self.has_previous_page)
            .field("is_fetching_next_page", &self.is_fetching_next_page)
            .field("is_fetching_previous_page", &self.is_fetching_previous_page)
            .finish()
    }
}

/// Observer for an infinite query: a [`QueryObserver`] over [`InfiniteData`]
/// with incremental page fetching.
pub struct InfiniteQueryObserver<TPage: QueryData> {
    self_weak: std::sync::Weak<Self>,
    observer: Arc<QueryObserver<InfiniteData<TPage>>>,
    pages: InfinitePageConfig<TPage>,
}

impl<TPage: QueryData> InfiniteQueryObserver<TPage> {
    pub fn new(
        client: &QueryClient,
        mut options: QueryObserverOptions<InfiniteData<TPage>>,
        pages: InfinitePageConfig<TPage>,
    ) -> Arc<Self> {
        options.query = pages.install(options.query);
        let observer = QueryObserver::new(client, options);
        Arc::new_cyclic(|self_weak| Self {
            self_weak: self_weak.clone(),
            observer,
            pages,
        })
    }

    #[must_use]
    pub fn current_result(&self) -> InfiniteQueryObserverResult<TPage> {
        self.wrap(self.observer.current_result())
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(InfiniteQueryObserverResult<TPage>) + Send + Sync + 'static,
    ) -> ObserverSubscription<InfiniteData<TPage>> {
        let this = self.self_weak.clone();
        self.observer.subscribe(move |result| {
            if let Some(this) = this.upgrade() {
                listener(this.wrap(result));
            }
        })
    }

    /// Fetches the next page and appends it.
    pub fn fetch_next_page(&self) -> BoxFuture<'static, InfiniteQueryObserverResult<TPage>> {
        self.fetch_direction(FetchDirection::Forward)
    }

    /// Fetches the previous page and prepends it.
    pub fn fetch_previous_page(&self) -> BoxFuture<'static, InfiniteQueryObserverResult<TPage>> {
        self.fetch_direction(FetchDirection::Backward)
    }

    /// Refetches the cached pages, restricted to those the selector accepts.
    pub fn refetch_pages(
        &self,
        selector: impl Fn(&TPage, usize, &[TPage]) -> bool + Send + Sync + 'static,
    ) -> BoxFuture<'static, InfiniteQueryObserverResult<TPage>> {
        let selector: RefetchPageFn<TPage> = Arc::new(selector);
        let options = FetchOptions {
            cancel_refetch: true,
            meta: None,
            fetch_more: None,
            refetch_page: Some(Arc::new(selector) as Arc<dyn Any + Send + Sync>),
        };
        let promise = self.observer.fetch_with(options);
        let this = self.self_weak.upgrade().expect("observer alive");
        async move {
            let _ = promise.await;
            this.current_result()
        }
        .boxed()
    }

    /// Forces a full refetch of all pages.
    pub fn refetch(&self) -> BoxFuture<'static, InfiniteQueryObserverResult<TPage>> {
        let promise = self
            .observer
            .fetch_with(FetchOptions::default().cancel_refetch(true));
        let this = self.self_weak.upgrade().expect("observer alive");
        async move {
            let _ = promise.await;
            this.current_result()
        }
        .boxed()
    }

    fn fetch_direction(
        &self,
        direction: FetchDirection,
    ) -> BoxFuture<'static, InfiniteQueryObserverResult<TPage>> {
        let direction_tag = match direction {
            FetchDirection::Forward => "forward",
            FetchDirection::Backward => "backward",
        };
        let options = FetchOptions {
            cancel_refetch: true,
            meta: Some(Arc::new(json!({ "direction": direction_tag }))),
            fetch_more: Some(FetchMore {
                direction,
                page_param: None,
            }),
            refetch_page: None,
        };
        let promise = self.observer.fetch_with(options);
        let this = self.self_weak.upgrade().expect("observer alive");
        async move {
            let _ = promise.await;
            this.current_result()
        }
        .boxed()
    }

    fn wrap(
        &self,
        base: QueryObserverResult<InfiniteData<TPage>>,
    ) -> InfiniteQueryObserverResult<TPage> {
        let (has_next_page, has_previous_page) = match base.data.as_deref() {
            Some(data) => (
                self.pages
                    .next_page_param(data.pages.last(), &data.pages)
                    .is_some(),
                self.pages
                    .previous_page_param(data.pages.first(), &data.pages)
                    .is_some(),
            ),
            None => (false, false),
        };
        let direction = self
            .observer
            .query_fetch_meta()
            .and_then(|meta| meta.get("direction").and_then(|d| d.as_str().map(String::from)));
        let fetching = base.is_fetching();
        InfiniteQueryObserverResult {
            has_next_page,
            has_previous_page,
            is_fetching_next_page: fetching && direction.as_deref() == Some("forward"),
            is_fetching_previous_page: fetching && direction.as_deref() == Some("backward"),
            base,
        }
    }
}

impl<TPage: QueryData> std::fmt::Debug for InfiniteQueryObserver<TPage> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfiniteQueryObserver")
            .field("pages", &self.pages)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_param_validity() {
        assert!(!page_param_valid(&None));
        assert!(!page_param_valid(&Some(Value::Null)));
        assert!(!page_param_valid(&Some(Value::Bool(false))));
        assert!(page_param_valid(&Some(json!(2))));
        assert!(page_param_valid(&Some(json!("cursor"))));
        assert!(page_param_valid(&Some(Value::Bool(true))));
    }

    #[test]
    fn test_next_page_param_requires_getter_and_pages() {
        let config: InfinitePageConfig<i32> = InfinitePageConfig::new();
        assert_eq!(config.next_page_param(Some(&1), &[1]), None);

        let config = config.get_next_page_param(|last, _all| Some(json!(last + 1)));
        assert_eq!(config.next_page_param(None, &[]), None);
        assert_eq!(config.next_page_param(Some(&3), &[1, 2, 3]), Some(json!(4)));
    }

    #[test]
    fn test_next_page_param_normalizes_null() {
        let config: InfinitePageConfig<i32> =
            InfinitePageConfig::new().get_next_page_param(|_, _| Some(Value::Null));
        assert_eq!(config.next_page_param(Some(&1), &[1]), None);
    }
}

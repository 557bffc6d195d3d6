//! Client for the Yokohama facility reservation site (`shisetsu.city.yokohama.lg.jp`).
//!
//! [`ShisetsuApi`] replays the requests the site's own pages make: it
//! acquires an anti-forgery token, fires the header calls a browser makes on
//! load, submits the date/time search and follows the detail page the search
//! points at.

pub mod dispatch;
pub mod errors;
pub mod interpret;
pub mod json;
pub mod locator;
pub mod query;
pub mod scrape;
pub mod session;
pub mod slots;
pub mod transport;

#[cfg(feature = "browser")]
pub mod browser;

pub use errors::{ProtocolError, RequestError, SearchError, SessionError, TransportError};
pub use query::{CriteriaError, HhMm, SearchCriteria, WeekdayCode};
pub use scrape::ScrapedPage;
pub use session::Session;
pub use slots::SlotRecord;

use crate::utils::{fmt_duration, log_if_slow};
use dispatch::{Body, DispatchConfig, RequestDispatcher, SendOptions};
use http::Method;
use interpret::{Next, RawResponse};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use transport::{ReqwestTransport, Transport};
use url::Url;

/// Name of the hidden anti-forgery form field.
pub const TOKEN_FIELD: &str = "__RequestVerificationToken";

const SLOW_SEARCH_THRESHOLD: Duration = Duration::from_secs(60);

/// Site-level settings the client needs.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Base URL, e.g. `https://www.shisetsu.city.yokohama.lg.jp/user`.
    pub base_url: Url,
    pub timeout: Duration,
    pub request_interval: Duration,
    pub retry_times: u32,
    pub retry_delay: Duration,
    pub session_ttl: Duration,
    /// Pause after the on-load header calls before the session is used.
    pub settle_delay: Duration,
    /// Keep the search result when the detail page answers non-2xx.
    pub tolerate_detail_status: bool,
}

impl SiteConfig {
    /// `<base>/<path>`.
    pub fn endpoint(&self, path: &str) -> Url {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        // Base is a valid absolute URL and `path` is a plain relative path.
        Url::parse(&joined).unwrap_or_else(|_| self.base_url.clone())
    }

    pub fn origin(&self) -> String {
        self.base_url.origin().ascii_serialization()
    }

    fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            origin: self.origin(),
            request_interval: self.request_interval,
            retry_times: self.retry_times,
            retry_delay: self.retry_delay,
        }
    }
}

/// Result of one completed search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// The search response as received, plus `DetailData` when a detail page was scraped.
    pub payload: Map<String, Value>,
    pub detail: Option<ScrapedPage>,
    /// Normalized slots; empty when nothing is vacant or there was no detail page.
    pub slots: Vec<SlotRecord>,
    /// Set when the server refused to continue processing.
    pub refusal: Option<ProtocolError>,
}

impl SearchOutcome {
    fn from_payload(payload: Map<String, Value>) -> Self {
        Self {
            payload,
            detail: None,
            slots: Vec::new(),
            refusal: None,
        }
    }

    pub fn is_refused(&self) -> bool {
        self.refusal.is_some()
    }
}

/// Stateful client; one per search task.
///
/// Owns exactly one [`Session`] and one throttle clock.
pub struct ShisetsuApi {
    site: SiteConfig,
    dispatcher: RequestDispatcher,
    session: Session,
}

impl ShisetsuApi {
    pub fn new(site: SiteConfig) -> anyhow::Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(site.timeout)?);
        Ok(Self::with_transport(site, transport))
    }

    pub fn with_transport(site: SiteConfig, transport: Arc<dyn Transport>) -> Self {
        let dispatcher = RequestDispatcher::new(transport, site.dispatch_config());
        Self {
            site,
            dispatcher,
            session: Session::new(),
        }
    }

    /// Abort between requests once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.dispatcher = self.dispatcher.with_cancellation(cancel);
        self
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Rebuild the session, retrying once on a session-level failure.
    pub async fn reinitialize(&mut self) -> Result<(), SessionError> {
        match self
            .session
            .reinitialize(&mut self.dispatcher, &self.site)
            .await
        {
            Ok(()) => Ok(()),
            Err(SessionError::Cancelled) => Err(SessionError::Cancelled),
            Err(first) => {
                warn!(error = %first, "Session initialization failed, retrying once");
                self.session
                    .reinitialize(&mut self.dispatcher, &self.site)
                    .await
            }
        }
    }

    /// Run one search with a freshly acquired session.
    pub async fn search(&mut self, criteria: &SearchCriteria) -> Result<SearchOutcome, SearchError> {
        let span = info_span!(
            "search",
            from = %criteria.date_from(),
            to = %criteria.date_to(),
        );
        async move {
            let start = Instant::now();
            let outcome = self.search_inner(criteria).await;
            log_if_slow(start, SLOW_SEARCH_THRESHOLD, "search");
            match &outcome {
                Ok(o) => info!(
                    slots = o.slots.len(),
                    refused = o.is_refused(),
                    duration = fmt_duration(start.elapsed()),
                    "Search finished"
                ),
                Err(e) => warn!(error = %e, "Search failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn search_inner(&mut self, criteria: &SearchCriteria) -> Result<SearchOutcome, SearchError> {
        // The token is short-lived relative to the poll interval; never reuse one.
        self.reinitialize().await.map_err(session_failure)?;

        let home = self.site.endpoint("Home");
        self.dispatcher
            .send(
                &mut self.session,
                Method::GET,
                home.clone(),
                None,
                SendOptions::document().referer(home.clone()).error_for_status(),
            )
            .await?;

        if matches!(self.session.token(), Err(SessionError::Expired)) {
            warn!("Token expired before submitting, reinitializing session");
            self.reinitialize().await.map_err(session_failure)?;
        }
        let token = self.session.token()?.to_string();
        let body = criteria.encode(&token);
        let search_url = self.site.endpoint("Home/SearchByDateTime");
        debug!(url = %search_url, "Submitting search");

        let resp = self
            .dispatcher
            .send(
                &mut self.session,
                Method::POST,
                search_url.clone(),
                Some(Body::Encoded(body)),
                SendOptions::api(home.clone()).error_for_status(),
            )
            .await?;

        let mut outcome: Option<SearchOutcome> = None;
        let mut state = interpret::decode(&resp.body).map_err(|source| {
            SearchError::InvalidResponse {
                status: resp.status.as_u16(),
                url: search_url.to_string(),
                source,
            }
        })?;

        loop {
            state = match state {
                RawResponse::JsonPayload(payload) => match interpret::classify(&payload, &self.site.base_url) {
                    Next::Done => return Ok(SearchOutcome::from_payload(payload)),
                    Next::FetchDetail(url) => {
                        info!(%url, "Search answered with a detail page");
                        outcome = Some(SearchOutcome::from_payload(payload));
                        RawResponse::HtmlFragmentReference(url)
                    }
                },
                RawResponse::HtmlFragmentReference(url) => {
                    let detail = self
                        .dispatcher
                        .send(
                            &mut self.session,
                            Method::GET,
                            url.clone(),
                            None,
                            SendOptions::document().referer(home.clone()),
                        )
                        .await?;
                    if !detail.is_success() {
                        if !self.site.tolerate_detail_status {
                            return Err(SearchError::DetailStatus {
                                url,
                                status: detail.status,
                            });
                        }
                        warn!(%url, status = detail.status.as_u16(), "Detail page unavailable, keeping bare result");
                        return Ok(outcome.unwrap_or_else(|| SearchOutcome::from_payload(Map::new())));
                    }
                    RawResponse::HtmlDocument(detail.body)
                }
                RawResponse::HtmlDocument(html) => {
                    let mut done = outcome.take().unwrap_or_else(|| SearchOutcome::from_payload(Map::new()));
                    let page = scrape::scrape(&html);
                    interpret::attach_detail(&mut done.payload, &page);
                    if page.error {
                        let message = page.error_message.clone().unwrap_or_default();
                        warn!(message = %message, "Server refused to continue processing");
                        done.refusal = Some(ProtocolError { message });
                    } else {
                        done.slots = slots::from_rows(&page.facilities);
                    }
                    done.detail = Some(page);
                    return Ok(done);
                }
            };
        }
    }
}

fn session_failure(err: SessionError) -> SearchError {
    match err {
        SessionError::Cancelled => SearchError::Cancelled,
        other => SearchError::Session(other),
    }
}

//! Outgoing request policy: throttle, retry, headers, cookies.

use super::TOKEN_FIELD;
use super::errors::{RequestError, TransportError};
use super::session::Session;
use super::transport::{HttpRequest, HttpResponse, Transport};
use crate::utils::fmt_duration;
use chrono::Utc;
use http::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, SET_COOKIE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use rand::Rng;
use rand::distr::Alphanumeric;
use reqwest::cookie::CookieStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";
const ACCEPT_DOCUMENT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_API: &str = "application/json, text/plain, */*";
const ACCEPT_LANGUAGE_VALUE: &str = "ja,en;q=0.9";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// Request body shapes the site expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Field list; sent as `multipart/form-data` when it carries the token.
    Fields(Vec<(String, String)>),
    /// Already URL-encoded string.
    Encoded(String),
}

impl Body {
    fn carries_token(&self) -> bool {
        match self {
            Body::Fields(fields) => fields.iter().any(|(name, _)| name == TOKEN_FIELD),
            Body::Encoded(encoded) => encoded.contains(TOKEN_FIELD),
        }
    }

    /// Serialize the body, negotiating a content type unless one is given.
    pub fn encode(self, explicit_type: Option<&HeaderValue>) -> (Vec<u8>, Option<HeaderValue>) {
        if explicit_type.is_some() || !self.carries_token() {
            let bytes = match self {
                Body::Fields(fields) => url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish()
                    .into_bytes(),
                Body::Encoded(encoded) => encoded.into_bytes(),
            };
            return (bytes, None);
        }

        match self {
            Body::Fields(fields) => {
                let boundary = multipart_boundary();
                let bytes = encode_multipart(&fields, &boundary).into_bytes();
                let content_type =
                    HeaderValue::from_str(&format!("multipart/form-data; boundary={boundary}"))
                        .expect("boundary is alphanumeric");
                (bytes, Some(content_type))
            }
            Body::Encoded(encoded) => (
                encoded.into_bytes(),
                Some(HeaderValue::from_static(FORM_URLENCODED)),
            ),
        }
    }
}

fn multipart_boundary() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("----WebKitFormBoundary{suffix}")
}

fn encode_multipart(fields: &[(String, String)], boundary: &str) -> String {
    let mut out = String::new();
    for (name, value) in fields {
        out.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    out.push_str(&format!("--{boundary}--\r\n"));
    out
}

/// Random W3C trace context header, as the site's own telemetry sends.
fn traceparent() -> String {
    let mut rng = rand::rng();
    let trace_id: u128 = rng.random();
    let span_id: u64 = rng.random();
    format!("00-{trace_id:032x}-{span_id:016x}-01")
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub accept: &'static str,
    pub referer: Option<Url>,
    /// Adds `X-Requested-With: XMLHttpRequest`.
    pub xhr: bool,
    /// Treat non-2xx statuses as transport failures (and retry them).
    pub error_for_status: bool,
    pub headers: HeaderMap,
}

impl SendOptions {
    /// A top-level page navigation.
    pub fn document() -> Self {
        Self {
            accept: ACCEPT_DOCUMENT,
            referer: None,
            xhr: false,
            error_for_status: false,
            headers: HeaderMap::new(),
        }
    }

    /// An XHR call issued from `referer`.
    pub fn api(referer: Url) -> Self {
        Self {
            accept: ACCEPT_API,
            referer: Some(referer),
            xhr: true,
            error_for_status: false,
            headers: HeaderMap::new(),
        }
    }

    pub fn referer(mut self, referer: Url) -> Self {
        self.referer = Some(referer);
        self
    }

    pub fn error_for_status(mut self) -> Self {
        self.error_for_status = true;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub origin: String,
    /// Minimum gap between the end of one request and the start of the next.
    pub request_interval: Duration,
    /// Total attempts per request, including the first.
    pub retry_times: u32,
    pub retry_delay: Duration,
}

impl DispatchConfig {
    /// Backoff before attempt `attempt + 1`, after `attempt` failures.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Sends requests one at a time on behalf of a single [`Session`].
///
/// Each dispatcher has its own throttle clock; parallel searches must not
/// share one.
pub struct RequestDispatcher {
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
    last_request_end: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestDispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: DispatchConfig) -> Self {
        Self {
            transport,
            config,
            last_request_end: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Sleep for `duration`, aborting early on cancellation.
    pub async fn pause(&self, duration: Duration) -> Result<(), RequestError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RequestError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn wait_for_interval(&self) -> Result<(), RequestError> {
        let Some(last_end) = self.last_request_end else {
            return Ok(());
        };
        let ready_at = last_end + self.config.request_interval;
        let now = Instant::now();
        if ready_at > now {
            let wait = ready_at - now;
            debug!(wait = fmt_duration(wait), "Throttling before next request");
            self.pause(wait).await?;
        }
        Ok(())
    }

    fn build_headers(
        &self,
        session: &Session,
        url: &Url,
        options: &SendOptions,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static(options.accept));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE));
        if let Ok(origin) = HeaderValue::from_str(&self.config.origin) {
            headers.insert(ORIGIN, origin);
        }
        let referer = options
            .referer
            .as_ref()
            .map(Url::as_str)
            .unwrap_or(self.config.origin.as_str());
        if let Ok(referer) = HeaderValue::from_str(referer) {
            headers.insert(REFERER, referer);
        }
        headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
        if let Ok(trace) = HeaderValue::from_str(&traceparent()) {
            headers.insert("traceparent", trace);
        }
        if options.xhr {
            headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
        }
        if let Some(cookies) = session.cookies.cookies(url) {
            headers.insert(COOKIE, cookies);
        }
        for (name, value) in &options.headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    /// Send one logical request, retrying transport failures with backoff.
    ///
    /// A response the server produced is returned as-is (unless
    /// `error_for_status` is set and the status is not 2xx), even when its
    /// content says processing cannot continue.
    pub async fn send(
        &mut self,
        session: &mut Session,
        method: Method,
        url: Url,
        body: Option<Body>,
        options: SendOptions,
    ) -> Result<HttpResponse, RequestError> {
        if self.cancel.is_cancelled() {
            return Err(RequestError::Cancelled);
        }
        self.wait_for_interval().await?;

        let mut headers = self.build_headers(session, &url, &options);
        let body = body.map(|body| {
            let (bytes, content_type) = body.encode(headers.get(CONTENT_TYPE));
            if let Some(content_type) = content_type {
                headers.insert(CONTENT_TYPE, content_type);
            }
            bytes
        });

        let max_attempts = self.config.retry_times.max(1);
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            trace!(%method, %url, attempt, max_attempts, "Sending request");

            let request = HttpRequest {
                method: method.clone(),
                url: url.clone(),
                headers: headers.clone(),
                body: body.clone(),
            };
            let outcome = match self.transport.execute(request).await {
                Ok(resp) if options.error_for_status && !resp.is_success() => {
                    Err(TransportError::Status(resp.status))
                }
                other => other,
            };

            match outcome {
                Ok(resp) => break Ok(resp),
                Err(e) if attempt < max_attempts => {
                    let wait = self.config.backoff(attempt);
                    warn!(
                        %method, %url, attempt, max_attempts, error = %e,
                        retry_in = fmt_duration(wait),
                        "Request failed, retrying"
                    );
                    if let Err(cancelled) = self.pause(wait).await {
                        break Err(cancelled);
                    }
                }
                Err(e) => {
                    break Err(RequestError::Exhausted {
                        method: method.clone(),
                        url: url.clone(),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        };

        self.last_request_end = Some(Instant::now());
        session.last_request_at = Some(Utc::now());

        let resp = result?;
        let mut set_cookies = resp.headers.get_all(SET_COOKIE).iter().peekable();
        if set_cookies.peek().is_some() {
            session.cookies.set_cookies(&mut set_cookies, &resp.url);
        }
        debug!(%method, %url, status = resp.status.as_u16(), "Request completed");
        Ok(resp)
    }
}

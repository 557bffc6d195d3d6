//! Session state: cookie jar, anti-forgery token and its expiry.

use super::dispatch::{Body, RequestDispatcher, SendOptions};
use super::errors::{RequestError, SessionError};
use super::{SiteConfig, TOKEN_FIELD};
use chrono::{DateTime, Utc};
use custom_debug_derive::Debug;
use html_scraper::{Html, Selector};
use http::Method;
use reqwest::cookie::Jar;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

static TOKEN_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"input[name="__RequestVerificationToken"]"#).expect("valid selector")
});

const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// One server-side session.
///
/// Rebuilt from scratch before every search; nothing survives a
/// [`Session::reinitialize`] except the value itself.
#[derive(Debug)]
pub struct Session {
    #[debug(skip)]
    pub(crate) cookies: Arc<Jar>,
    #[debug(with = "crate::fmt::redacted")]
    token: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
    /// Expiry on the runtime clock; this is what [`Session::token`] checks.
    token_deadline: Option<Instant>,
    pub(crate) last_request_at: Option<DateTime<Utc>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            cookies: Arc::new(Jar::default()),
            token: None,
            token_expires_at: None,
            token_deadline: None,
            last_request_at: None,
        }
    }

    /// The current token, if the session is initialized and not expired.
    pub fn token(&self) -> Result<&str, SessionError> {
        let token = self.token.as_deref().ok_or(SessionError::TokenNotFound)?;
        if self.is_expired() {
            return Err(SessionError::Expired);
        }
        Ok(token)
    }

    pub fn is_expired(&self) -> bool {
        self.token_deadline
            .is_none_or(|deadline| Instant::now() >= deadline)
    }

    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.token_expires_at
    }

    pub fn last_request_at(&self) -> Option<DateTime<Utc>> {
        self.last_request_at
    }

    /// Drop all state and acquire a new token.
    ///
    /// Fetches the landing page, extracts the hidden token field, then fires
    /// the same header calls a browser makes on load so that the server-side
    /// session is consistent with the token.
    pub async fn reinitialize(
        &mut self,
        dispatcher: &mut RequestDispatcher,
        site: &SiteConfig,
    ) -> Result<(), SessionError> {
        *self = Session::new();
        info!("Initializing session");

        let home = site.endpoint("Home");
        let resp = dispatcher
            .send(
                self,
                Method::GET,
                home.clone(),
                None,
                SendOptions::document().error_for_status(),
            )
            .await?;

        let token = extract_token(&resp.body).ok_or(SessionError::TokenNotFound)?;
        self.set_token(token, site.session_ttl);
        debug!(expires_at = ?self.token_expires_at, "Acquired anti-forgery token");

        for path in ["api/Header/GetSiteClosing", "api/Header/GetSessionInterval"] {
            self.precursor(dispatcher, site, path).await?;
        }

        if !site.settle_delay.is_zero() {
            dispatcher.pause(site.settle_delay).await?;
        }
        Ok(())
    }

    /// Fire one of the on-load header calls. Failures are tolerated.
    async fn precursor(
        &mut self,
        dispatcher: &mut RequestDispatcher,
        site: &SiteConfig,
        path: &str,
    ) -> Result<(), SessionError> {
        let token = self.token()?.to_string();
        let url = site.endpoint(path);
        let body = Body::Fields(vec![(TOKEN_FIELD.to_string(), token)]);
        let options = SendOptions::api(site.endpoint("Home")).error_for_status();

        match dispatcher
            .send(self, Method::POST, url, Some(body), options)
            .await
        {
            Ok(resp) => {
                let payload = serde_json::from_str::<serde_json::Value>(&resp.body).ok();
                debug!(path, ?payload, "Precursor call completed");
                Ok(())
            }
            Err(RequestError::Cancelled) => Err(SessionError::Cancelled),
            Err(e) => {
                warn!(path, error = %e, "Precursor call failed, continuing");
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn with_token(token: &str, ttl: Duration) -> Self {
        let mut session = Session::new();
        session.set_token(token.to_string(), ttl);
        session
    }

    fn set_token(&mut self, token: String, ttl: Duration) {
        self.token = Some(token);
        let ttl = ttl.min(MAX_TTL);
        self.token_deadline = Some(Instant::now() + ttl);
        let ttl = chrono::TimeDelta::from_std(ttl).unwrap_or(chrono::TimeDelta::days(1));
        self.token_expires_at = Some(Utc::now() + ttl);
    }
}

/// Pull the anti-forgery token out of the landing page.
pub fn extract_token(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&TOKEN_SELECTOR)
        .filter_map(|input| input.attr("value"))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

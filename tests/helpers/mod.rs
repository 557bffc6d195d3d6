//! Shared fixtures: a scripted in-memory transport and canned site pages.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use shisetsu::shisetsu::transport::{HttpRequest, HttpResponse, Transport};
use shisetsu::shisetsu::{SearchCriteria, SiteConfig, TransportError, WeekdayCode};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

pub const BASE: &str = "https://shisetsu.test/user";
pub const TOKEN: &str = "CfDJ8-test-token";

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond {
        status: StatusCode,
        body: String,
        cookies: Vec<String>,
    },
    Timeout,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::Respond {
            status: StatusCode::OK,
            body: body.into(),
            cookies: Vec::new(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Respond {
            status: StatusCode::from_u16(status).unwrap(),
            body: body.into(),
            cookies: Vec::new(),
        }
    }

    pub fn with_cookie(mut self, cookie: &str) -> Self {
        if let Self::Respond { cookies, .. } = &mut self {
            cookies.push(cookie.to_string());
        }
        self
    }
}

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub at: Instant,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }
}

struct Route {
    method: Method,
    path: String,
    /// Consumed in order; the last reply repeats.
    replies: VecDeque<Reply>,
}

/// Transport that answers from a script keyed by method and path.
///
/// Unscripted requests get a 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    log: Mutex<Vec<Recorded>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: Method, path: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.routes.lock().unwrap().push(Route {
            method,
            path: path.to_string(),
            replies: replies.into_iter().collect(),
        });
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path() == path)
            .collect()
    }

    fn next_reply(&self, method: &Method, path: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .find(|r| r.method == *method && r.path == path)?;
        if route.replies.len() > 1 {
            route.replies.pop_front()
        } else {
            route.replies.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.log.lock().unwrap().push(Recorded {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request
                .body
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned()),
            at: Instant::now(),
        });

        let reply = self
            .next_reply(&request.method, request.url.path())
            .unwrap_or_else(|| Reply::status(404, "not found"));
        match reply {
            Reply::Timeout => Err(TransportError::Timeout),
            Reply::Respond {
                status,
                body,
                cookies,
            } => {
                let mut headers = HeaderMap::new();
                for cookie in cookies {
                    headers.append(SET_COOKIE, HeaderValue::from_str(&cookie).unwrap());
                }
                Ok(HttpResponse {
                    status,
                    url: request.url,
                    headers,
                    body,
                })
            }
        }
    }
}

pub fn site() -> SiteConfig {
    SiteConfig {
        base_url: Url::parse(BASE).unwrap(),
        timeout: Duration::from_secs(30),
        request_interval: Duration::from_secs(3),
        retry_times: 3,
        retry_delay: Duration::from_secs(5),
        session_ttl: Duration::from_secs(1800),
        settle_delay: Duration::from_secs(1),
        tolerate_detail_status: true,
    }
}

pub fn criteria() -> SearchCriteria {
    SearchCriteria::builder(
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
    )
    .areas([15, 5, 14])
    .weekdays([6, 7, 8].map(|d| WeekdayCode::new(d).unwrap()))
    .build()
    .unwrap()
}

pub fn home_page(token: &str) -> String {
    format!(
        r#"<html><head><title>横浜市施設予約システム</title></head><body>
        <form action="/user/Home" method="post">
            <input name="__RequestVerificationToken" type="hidden" value="{token}" />
        </form></body></html>"#
    )
}

pub const HOME_WITHOUT_TOKEN: &str =
    "<html><head><title>メンテナンス中</title></head><body><p>ただいまメンテナンス中です</p></body></html>";

pub const DETAIL_PAGE: &str = r#"<html><head><title>空き状況</title></head><body>
    <div class="date-term">2024/06/01 ～ 2024/06/30</div>
    <div class="card-header">中区</div>
    <table class="table table-hover">
        <thead><tr><th>No</th><th>施設</th><th>室場</th><th>日付</th><th>時間帯</th></tr></thead>
        <tbody>
            <tr><td>1</td><td>中スポーツセンター</td><td>体育室 全面</td><td>2024/06/02(日)</td><td>13:00～15:00</td></tr>
            <tr><td>2</td><td>西スポーツセンター</td><td>体育室 半面A</td><td>2024/06/01(土)</td><td>09:00～11:00</td></tr>
        </tbody>
    </table>
</body></html>"#;

pub const REFUSAL_PAGE: &str = r#"<html><head><title>エラー</title></head><body>
    <div class="page-header"><h2>処理を続行いただけません</h2></div>
    <div class="page-body">セッションの有効期限が切れました。</div>
</body></html>"#;

pub const SEARCH_REDIRECT: &str = r#"{"Result":0,"Information":"./VacantFrameFacilityStatus"}"#;

/// A site that answers every step of the happy path.
pub fn happy_site() -> MockTransport {
    MockTransport::new()
        .on(Method::GET, "/user/Home", [Reply::ok(home_page(TOKEN))])
        .on(
            Method::POST,
            "/user/api/Header/GetSiteClosing",
            [Reply::ok(r#"{"Data":{"IsClosing":false}}"#)],
        )
        .on(
            Method::POST,
            "/user/api/Header/GetSessionInterval",
            [Reply::ok(r#"{"Data":{"SessionInterval":1800}}"#)],
        )
        .on(
            Method::POST,
            "/user/Home/SearchByDateTime",
            [Reply::ok(SEARCH_REDIRECT)],
        )
        .on(
            Method::GET,
            "/user/VacantFrameFacilityStatus",
            [Reply::ok(DETAIL_PAGE)],
        )
}

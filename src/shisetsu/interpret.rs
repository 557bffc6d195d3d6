//! Classification of the search response.
//!
//! The search endpoint answers with JSON. When results cannot be embedded,
//! its `Information` field holds a relative path to an HTML page that must be
//! fetched and scraped separately:
//!
//! ```text
//! RECEIVED --(Information is a path)--> NEEDS_DETAIL --GET--> HTML_FRAGMENT --scrape--> DONE
//!     \--(anything else)------------------------------------------------------------> DONE
//! any step failing ----------------------------------------------------------------> FAILED
//! ```

use super::json::parse_json_with_context;
use super::scrape::ScrapedPage;
use serde_json::{Map, Value};
use url::Url;

/// Key the search response uses to point at the detail page.
pub const INFORMATION_KEY: &str = "Information";
/// Key the scraped detail page is attached under.
pub const DETAIL_KEY: &str = "DetailData";

/// A response as received, before interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    JsonPayload(Map<String, Value>),
    HtmlFragmentReference(Url),
    HtmlDocument(String),
}

/// What the interpreter does next with a decoded search payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    /// The payload is the whole answer (no data, or an application error).
    Done,
    /// Fetch this page and scrape it.
    FetchDetail(Url),
}

/// Decode the search response body. It must be a JSON object.
pub fn decode(body: &str) -> anyhow::Result<RawResponse> {
    parse_json_with_context(body).map(RawResponse::JsonPayload)
}

/// Decide whether the payload points at a detail page.
///
/// Both `./Foo` and `/Foo` resolve under the site base, as `<base>/Foo`.
pub fn classify(payload: &Map<String, Value>, base: &Url) -> Next {
    let Some(info) = payload.get(INFORMATION_KEY).and_then(Value::as_str) else {
        return Next::Done;
    };

    let resolved = info
        .strip_prefix("./")
        .or_else(|| info.strip_prefix('/'))
        .and_then(|rest| {
            Url::parse(&format!("{}/{rest}", base.as_str().trim_end_matches('/'))).ok()
        });

    match resolved {
        Some(url) => Next::FetchDetail(url),
        None => Next::Done,
    }
}

/// Attach the scraped page to the payload under [`DETAIL_KEY`].
pub fn attach_detail(payload: &mut Map<String, Value>, page: &ScrapedPage) {
    // ScrapedPage holds only strings, bools and maps of strings.
    let detail = serde_json::to_value(page).unwrap_or(Value::Null);
    payload.insert(DETAIL_KEY.to_string(), detail);
}

//! Best-effort scraping of the detail fragment the search redirects to.
//!
//! Every extraction is an independent function over the parsed document.
//! A missing element yields `None`/empty, never an error: the page layout
//! belongs to a third party and changes without notice.

use html_scraper::{ElementRef, Html, Selector};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::debug;

/// Heading text the site shows when it refuses to continue (expired session etc).
pub const REFUSAL_MARKER: &str = "処理を続行いただけません";
const UNKNOWN_ERROR: &str = "unknown error";
const UNTITLED: &str = "untitled";

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect("valid selector"));
    };
}

selector!(TITLE, "title");
selector!(ERROR_HEADING, ".page-header h2");
selector!(ERROR_BODY, ".page-body");
selector!(TABLES, "table.table-hover, table.table-bordered");
selector!(THEAD_TH, "thead th");
selector!(ANY_TH, "th");
selector!(BODY_ROWS, "tbody tr");
selector!(CELLS, "td");
selector!(ANCHOR, "a");
selector!(DATE_TERM, ".dateTerm, .date-term");
selector!(SECTION_HEADERS, ".card-header, .section-header");
selector!(WARNINGS, ".alert, .error-message");

/// One table row, keyed by normalized header name.
pub type Row = IndexMap<String, String>;

/// Everything extracted from a detail page.
///
/// Serializes to the `DetailData` object attached to the search response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapedPage {
    pub html_content: bool,
    pub title: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub facilities: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose_info: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ScrapedPage {
    fn empty(title: String) -> Self {
        Self {
            html_content: true,
            title,
            error: false,
            error_message: None,
            facilities: Vec::new(),
            date_range: None,
            area_info: None,
            facility_type: None,
            purpose_info: None,
            warnings: Vec::new(),
        }
    }
}

/// Labels found in section headers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct SectionLabels {
    area: Option<String>,
    facility_type: Option<String>,
    purpose: Option<String>,
}

/// Scrape a detail page.
pub fn scrape(html: &str) -> ScrapedPage {
    let doc = Html::parse_document(html);
    let mut page = ScrapedPage::empty(title(&doc).unwrap_or_else(|| UNTITLED.to_string()));

    if let Some(message) = refusal(&doc) {
        page.error = true;
        page.error_message = Some(message);
        return page;
    }

    page.facilities = facility_rows(&doc);
    page.date_range = date_range(&doc);
    let labels = section_labels(&doc);
    page.area_info = labels.area;
    page.facility_type = labels.facility_type;
    page.purpose_info = labels.purpose;
    page.warnings = warnings(&doc);

    debug!(
        rows = page.facilities.len(),
        warnings = page.warnings.len(),
        "Scraped detail page"
    );
    page
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn title(doc: &Html) -> Option<String> {
    doc.select(&TITLE).next().map(text_of)
}

/// The page's refusal message, if this is the "cannot continue" page.
fn refusal(doc: &Html) -> Option<String> {
    let heading = doc.select(&ERROR_HEADING).next()?;
    if !text_of(heading).contains(REFUSAL_MARKER) {
        return None;
    }
    let message = doc
        .select(&ERROR_BODY)
        .next()
        .map(text_of)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
    Some(message)
}

/// `"施設 名"` and `"施設　名"` both become `"施設_名"`.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

fn table_headers(table: ElementRef<'_>) -> Vec<String> {
    let mut headers: Vec<String> = table.select(&THEAD_TH).map(text_of).collect();
    if headers.is_empty() {
        headers = table.select(&ANY_TH).map(text_of).collect();
    }
    headers.iter().map(|h| normalize_header(h)).collect()
}

fn row_fields(row: ElementRef<'_>, headers: &[String]) -> Row {
    let mut fields = Row::new();
    for (cell, header) in row.select(&CELLS).zip(headers) {
        fields.insert(header.clone(), text_of(cell));

        if let Some(href) = cell.select(&ANCHOR).next().and_then(|a| a.attr("href")) {
            fields.insert(format!("{header}_link"), href.to_string());
        }

        for (name, value) in cell.value().attrs() {
            if name.starts_with("data-") {
                fields.insert(format!("{header}_{name}"), value.to_string());
            }
        }
    }
    fields
}

/// Rows of every result table, in document order.
fn facility_rows(doc: &Html) -> Vec<Row> {
    let mut rows = Vec::new();
    for table in doc.select(&TABLES) {
        let headers = table_headers(table);
        rows.extend(
            table
                .select(&BODY_ROWS)
                .map(|row| row_fields(row, &headers))
                .filter(|fields| !fields.is_empty()),
        );
    }
    rows
}

fn date_range(doc: &Html) -> Option<String> {
    doc.select(&DATE_TERM).next().map(text_of)
}

/// Later sections override earlier ones, matching how the page lists them.
fn section_labels(doc: &Html) -> SectionLabels {
    let mut labels = SectionLabels::default();
    for section in doc.select(&SECTION_HEADERS) {
        let text = text_of(section);
        if text.contains('区') {
            labels.area = Some(text);
        } else if text.contains("施設") || text.contains("設備") {
            labels.facility_type = Some(text);
        } else if text.contains("用途") {
            labels.purpose = Some(text);
        }
    }
    labels
}

fn warnings(doc: &Html) -> Vec<String> {
    doc.select(&WARNINGS).map(text_of).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFUSAL_PAGE: &str = r#"<html><head><title>エラー</title></head><body>
        <div class="page-header"><h2>処理を続行いただけません</h2></div>
        <div class="page-body">
            セッションの有効期限が切れました。
        </div>
        <table class="table-hover"><thead><tr><th>施設</th></tr></thead>
            <tbody><tr><td>should not be read</td></tr></tbody></table>
    </body></html>"#;

    const STATUS_PAGE: &str = r#"<html><head><title>空き状況</title></head><body>
        <div class="card-header">中区・西区</div>
        <div class="section-header">体育室 施設</div>
        <div class="card-header">用途: バドミントン</div>
        <p class="dateTerm"> 2024/06/01 ～ 2024/06/30 </p>
        <div class="alert">検索結果が多いため一部のみ表示しています</div>
        <table class="table table-hover table-bordered">
            <thead><tr><th>No</th><th>施設</th><th>室場</th><th>日付</th><th>時間帯</th></tr></thead>
            <tbody>
                <tr>
                    <td>1</td>
                    <td data-facility-code="1010"><a href="/user/Facility/1010">中スポーツセンター</a></td>
                    <td>体育室 全面</td>
                    <td>2024/06/01(土)</td>
                    <td>09:00～11:00</td>
                </tr>
                <tr></tr>
                <tr>
                    <td>2</td>
                    <td>西スポーツセンター</td>
                    <td>体育室 半面A</td>
                    <td>2024/06/02(日)</td>
                    <td>13:00～15:00</td>
                </tr>
            </tbody>
        </table>
    </body></html>"#;

    #[test]
    fn test_refusal_page_short_circuits() {
        let page = scrape(REFUSAL_PAGE);
        assert!(page.error);
        assert_eq!(
            page.error_message.as_deref(),
            Some("セッションの有効期限が切れました。")
        );
        assert!(page.facilities.is_empty());
        assert_eq!(page.title, "エラー");
    }

    #[test]
    fn test_refusal_without_body_uses_fallback_message() {
        let html = r#"<div class="page-header"><h2>処理を続行いただけません</h2></div>"#;
        let page = scrape(html);
        assert!(page.error);
        assert_eq!(page.error_message.as_deref(), Some(UNKNOWN_ERROR));
    }

    #[test]
    fn test_other_heading_is_not_refusal() {
        let html = r#"<div class="page-header"><h2>空き状況</h2></div>"#;
        assert!(!scrape(html).error);
    }

    #[test]
    fn test_rows_are_keyed_by_header() {
        let page = scrape(STATUS_PAGE);
        assert_eq!(page.facilities.len(), 2);

        let first = &page.facilities[0];
        assert_eq!(first["No"], "1");
        assert_eq!(first["施設"], "中スポーツセンター");
        assert_eq!(first["施設_link"], "/user/Facility/1010");
        assert_eq!(first["施設_data-facility-code"], "1010");
        assert_eq!(first["室場"], "体育室 全面");
        assert_eq!(first["日付"], "2024/06/01(土)");
        assert_eq!(first["時間帯"], "09:00～11:00");

        assert!(!page.facilities[1].contains_key("施設_link"));
    }

    #[test]
    fn test_optional_sections() {
        let page = scrape(STATUS_PAGE);
        assert_eq!(page.title, "空き状況");
        assert_eq!(page.date_range.as_deref(), Some("2024/06/01 ～ 2024/06/30"));
        assert_eq!(page.area_info.as_deref(), Some("中区・西区"));
        assert_eq!(page.facility_type.as_deref(), Some("体育室 施設"));
        assert_eq!(page.purpose_info.as_deref(), Some("用途: バドミントン"));
        assert_eq!(page.warnings, ["検索結果が多いため一部のみ表示しています"]);
    }

    #[test]
    fn test_headers_fall_back_to_bare_th() {
        let html = r#"<table class="table-bordered">
            <tr><th>施設 名</th><th>日　付</th></tr>
            <tr><td>A</td><td>2024/06/01</td></tr>
        </table>"#;
        let page = scrape(html);
        assert_eq!(page.facilities.len(), 1);
        assert_eq!(page.facilities[0]["施設_名"], "A");
        assert_eq!(page.facilities[0]["日_付"], "2024/06/01");
    }

    #[test]
    fn test_unmatched_tables_are_ignored() {
        let html = r#"<table class="layout"><tr><th>x</th></tr><tr><td>1</td></tr></table>"#;
        let page = scrape(html);
        assert!(page.facilities.is_empty());
        assert!(!page.error);
        assert_eq!(page.title, UNTITLED);
    }

    #[test]
    fn test_extra_cells_beyond_headers_are_dropped() {
        let html = r#"<table class="table-hover">
            <thead><tr><th>施設</th></tr></thead>
            <tbody><tr><td>A</td><td>orphan</td></tr></tbody>
        </table>"#;
        let page = scrape(html);
        assert_eq!(page.facilities[0].len(), 1);
    }

    #[test]
    fn test_scrape_is_idempotent() {
        assert_eq!(scrape(STATUS_PAGE), scrape(STATUS_PAGE));
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  施設 名 "), "施設_名");
        assert_eq!(normalize_header("時間　帯"), "時間_帯");
        assert_eq!(normalize_header("No"), "No");
    }

    #[test]
    fn test_serialized_shape_omits_absent_fields() {
        let json = serde_json::to_value(scrape(REFUSAL_PAGE)).unwrap();
        assert_eq!(json["error"], true);
        assert_eq!(json["html_content"], true);
        assert!(json.get("facilities").is_none());
        assert!(json.get("warnings").is_none());
    }
}

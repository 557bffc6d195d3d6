//! Ordered element-locator chains for the site's search form.
//!
//! Each UI element is described by a [`LocatorChain`]: strategies are tried in
//! order and the first one that matches wins. The same chain resolves against
//! a parsed [`Html`] document (fixtures, page sources) and translates to
//! WebDriver queries when the `browser` feature is enabled.

use super::query::WeekdayCode;
use html_scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static ANY_ELEMENT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("*").expect("valid selector"));
static LABELS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("label").expect("valid selector"));

/// One way of finding an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    Id(String),
    Name(String),
    /// Element of `tag` whose whitespace-normalized text equals (or contains) `text`.
    Text {
        tag: String,
        text: String,
        exact: bool,
    },
    /// The element a `<label>` with this exact text points at via `for`.
    LabelFor(String),
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Self::Css(css.into())
    }

    pub fn text(tag: &str, text: impl Into<String>) -> Self {
        Self::Text {
            tag: tag.to_string(),
            text: text.into(),
            exact: true,
        }
    }

    pub fn text_containing(tag: &str, text: impl Into<String>) -> Self {
        Self::Text {
            tag: tag.to_string(),
            text: text.into(),
            exact: false,
        }
    }

    /// First matching element in `doc`.
    pub fn find<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        match self {
            Locator::Css(css) => {
                let selector = Selector::parse(css).ok()?;
                doc.select(&selector).next()
            }
            Locator::Id(id) => by_id(doc, id),
            Locator::Name(name) => doc
                .select(&ANY_ELEMENT)
                .find(|el| el.value().attr("name") == Some(name.as_str())),
            Locator::Text { tag, text, exact } => {
                let selector = Selector::parse(tag).ok()?;
                doc.select(&selector).find(|el| {
                    let content = normalize_space(el);
                    if *exact {
                        content == *text
                    } else {
                        content.contains(text.as_str())
                    }
                })
            }
            Locator::LabelFor(text) => {
                let target = doc
                    .select(&LABELS)
                    .filter(|label| normalize_space(label) == *text)
                    .find_map(|label| label.value().attr("for"))?;
                by_id(doc, target)
            }
        }
    }

    /// XPath equivalent, used for the text-based strategies.
    pub fn xpath(&self) -> Option<String> {
        match self {
            Locator::Text { tag, text, exact } => Some(if *exact {
                format!("//{tag}[normalize-space(.)={}]", xpath_literal(text))
            } else {
                format!("//{tag}[contains(normalize-space(.), {})]", xpath_literal(text))
            }),
            Locator::LabelFor(text) => Some(format!(
                "//*[@id=//label[normalize-space(.)={}]/@for]",
                xpath_literal(text)
            )),
            _ => None,
        }
    }

    #[cfg(feature = "browser")]
    pub fn to_by(&self) -> thirtyfour::By {
        use thirtyfour::By;
        match self {
            Locator::Css(css) => By::Css(css.as_str()),
            Locator::Id(id) => By::Id(id.as_str()),
            Locator::Name(name) => By::Name(name.as_str()),
            other => By::XPath(other.xpath().unwrap_or_default()),
        }
    }
}

fn by_id<'a>(doc: &'a Html, id: &str) -> Option<ElementRef<'a>> {
    doc.select(&ANY_ELEMENT).find(|el| el.value().id() == Some(id))
}

fn normalize_space(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote `s` as an XPath 1.0 string literal.
fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// A named, ordered list of strategies for one UI element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorChain {
    pub name: String,
    pub strategies: Vec<Locator>,
}

impl LocatorChain {
    pub fn new(name: impl Into<String>, strategies: Vec<Locator>) -> Self {
        Self {
            name: name.into(),
            strategies,
        }
    }

    /// The first strategy that matches, with its index.
    pub fn locate<'a>(&self, doc: &'a Html) -> Option<(usize, ElementRef<'a>)> {
        self.strategies
            .iter()
            .enumerate()
            .find_map(|(i, strategy)| strategy.find(doc).map(|el| (i, el)))
    }
}

/// Search form and results page elements.
pub mod form {
    use super::*;

    pub fn date_time_tab() -> LocatorChain {
        LocatorChain::new(
            "date/time tab",
            vec![
                Locator::text_containing("li", "日時から探す"),
                Locator::text_containing("a", "日時から探す"),
            ],
        )
    }

    pub fn purpose_checkbox(label: &str) -> LocatorChain {
        LocatorChain::new(
            format!("purpose {label}"),
            vec![
                Locator::LabelFor(label.to_string()),
                Locator::text("label", label),
            ],
        )
    }

    pub fn date_from() -> LocatorChain {
        LocatorChain::new(
            "date from",
            vec![
                Locator::Name("HomeModel.DateFrom".into()),
                Locator::Id("HomeModel_DateFrom".into()),
            ],
        )
    }

    pub fn date_to() -> LocatorChain {
        LocatorChain::new(
            "date to",
            vec![
                Locator::Name("HomeModel.DateTo".into()),
                Locator::Id("HomeModel_DateTo".into()),
            ],
        )
    }

    pub fn vacant_frames() -> LocatorChain {
        LocatorChain::new(
            "vacant frames",
            vec![
                Locator::text("label", "空きコマ"),
                Locator::LabelFor("空きコマ".into()),
            ],
        )
    }

    pub fn area_filter() -> LocatorChain {
        LocatorChain::new(
            "area filter",
            vec![
                Locator::text_containing("button", "区名などで絞り込む"),
                Locator::text_containing("a", "区名などで絞り込む"),
            ],
        )
    }

    /// Ward checkbox by its form value, then by `label` when one is known.
    pub fn area_checkbox(code: u32, label: Option<&str>) -> LocatorChain {
        let mut strategies = vec![Locator::css(format!(
            r#"input[name="HomeModel.SearchByDateTimeModel.SelectedArea"][value="{code}"]"#
        ))];
        if let Some(label) = label {
            strategies.push(Locator::LabelFor(label.to_string()));
            strategies.push(Locator::text("label", label));
        }
        LocatorChain::new(format!("area {code}"), strategies)
    }

    pub fn time_from() -> LocatorChain {
        LocatorChain::new(
            "time from",
            vec![
                Locator::Id("HomeModel_TimeFrom".into()),
                Locator::Name("HomeModel.TimeFrom".into()),
            ],
        )
    }

    pub fn time_to() -> LocatorChain {
        LocatorChain::new(
            "time to",
            vec![
                Locator::Id("HomeModel_TimeTo".into()),
                Locator::Name("HomeModel.TimeTo".into()),
            ],
        )
    }

    pub fn weekday_checkbox(day: WeekdayCode) -> LocatorChain {
        LocatorChain::new(
            format!("weekday {}", day.label()),
            vec![
                Locator::css(format!(
                    r#"input[name="HomeModel.SelectedWeekDays"][value="{}"]"#,
                    day.get()
                )),
                Locator::LabelFor(day.label().to_string()),
            ],
        )
    }

    pub fn search_button() -> LocatorChain {
        LocatorChain::new(
            "search button",
            vec![
                Locator::css("button.btn-lg.btn-secondary"),
                Locator::text_containing("button", "検索"),
            ],
        )
    }

    pub fn load_more() -> LocatorChain {
        LocatorChain::new(
            "load more",
            vec![
                Locator::text_containing("button", "さらに読み込む"),
                Locator::css("button.btn-quaternary"),
            ],
        )
    }
}

//! CSS-selector extraction over archived HTML.

use std::cell::OnceCell;

use scraper::{ElementRef, Html, Selector};
use sxd_document::Package;
use url::Url;

use super::cleanup::Cleanup;
use super::xpath::to_xml;

/// A parsed archived page. The XML view for XPath parsers is built on
/// first use.
pub struct Page {
    html: Html,
    xml: OnceCell<Package>,
}

impl Page {
    pub fn parse(body: &str) -> Self {
        Self {
            html: Html::parse_document(body),
            xml: OnceCell::new(),
        }
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    pub fn xml(&self) -> &Package {
        self.xml.get_or_init(|| to_xml(&self.html))
    }
}

/// One result block pulled from a page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedItem {
    /// Serialized HTML of the block.
    pub content: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub text: Option<String>,
}

/// Compiled CSS extractor.
#[derive(Debug, Clone)]
pub struct CssExtractor {
    pub(crate) selector: Selector,
    pub(crate) attribute: Option<String>,
    pub(crate) url_parameter: Option<String>,
    pub(crate) url_selector: Option<Selector>,
    pub(crate) title_selector: Option<Selector>,
    pub(crate) text_selector: Option<Selector>,
}

impl CssExtractor {
    /// First non-empty value of the selected elements.
    pub fn extract_value(&self, html: &Html, base_url: Option<&Url>, cleanup: &Cleanup) -> Option<String> {
        html.select(&self.selector)
            .filter_map(|el| self.element_value(el, base_url))
            .find_map(|raw| cleanup.apply(&raw))
    }

    /// Every selected block, in document order.
    pub fn extract_items(&self, html: &Html, base_url: Option<&Url>, cleanup: &Cleanup) -> Vec<ExtractedItem> {
        html.select(&self.selector)
            .map(|el| {
                let url = match &self.url_selector {
                    Some(sel) => el.select(sel).next().and_then(|a| self.link_of(a, base_url)),
                    None => self.link_of(el, base_url),
                };
                let title = self
                    .title_selector
                    .as_ref()
                    .and_then(|sel| el.select(sel).next())
                    .and_then(|t| cleanup.apply(&element_text(t)));
                let text = self
                    .text_selector
                    .as_ref()
                    .and_then(|sel| el.select(sel).next())
                    .and_then(|t| cleanup.apply(&element_text(t)));
                ExtractedItem {
                    content: el.html(),
                    url,
                    title,
                    text,
                }
            })
            .collect()
    }

    fn element_value(&self, el: ElementRef<'_>, base_url: Option<&Url>) -> Option<String> {
        let Some(ref attribute) = self.attribute else {
            return Some(element_text(el));
        };
        let raw = el.value().attr(attribute)?;
        match &self.url_parameter {
            Some(param) => query_parameter(&resolve(raw, base_url)?, param),
            None => Some(raw.to_string()),
        }
    }

    fn link_of(&self, el: ElementRef<'_>, base_url: Option<&Url>) -> Option<String> {
        let attribute = self.attribute.as_deref().unwrap_or("href");
        let raw = el.value().attr(attribute)?;
        match &self.url_parameter {
            // Redirect links such as `/url?q=<target>`.
            Some(param) => query_parameter(&resolve(raw, base_url)?, param),
            None => Some(resolve(raw, base_url).map(|u| u.to_string()).unwrap_or_else(|| raw.to_string())),
        }
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

pub(crate) fn resolve(raw: &str, base_url: Option<&Url>) -> Option<Url> {
    match base_url {
        Some(base) => base.join(raw).ok(),
        None => Url::parse(raw).ok(),
    }
}

pub(crate) fn query_parameter(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn css(selector: &str) -> CssExtractor {
        CssExtractor {
            selector: Selector::parse(selector).unwrap(),
            attribute: None,
            url_parameter: None,
            url_selector: None,
            title_selector: None,
            text_selector: None,
        }
    }

    #[test]
    fn value_from_attribute() {
        let html = Html::parse_document(r#"<input name="q" value=" rust  book ">"#);
        let mut ex = css("input[name=q]");
        ex.attribute = Some("value".into());
        assert_eq!(ex.extract_value(&html, None, &Cleanup::default()).as_deref(), Some("rust book"));
    }

    #[test]
    fn items_with_redirect_links() {
        let html = Html::parse_document(
            r#"<div class="g"><a href="/url?q=https://rust-lang.org/&sa=U"><h3>Rust</h3></a><span>A language</span></div>
               <div class="g"><a href="https://b.example/"><h3>B</h3></a></div>"#,
        );
        let mut ex = css("div.g");
        ex.url_selector = Some(Selector::parse("a").unwrap());
        ex.url_parameter = Some("q".into());
        ex.title_selector = Some(Selector::parse("h3").unwrap());
        ex.text_selector = Some(Selector::parse("span").unwrap());
        let base = Url::parse("https://www.google.com/search?q=rust").unwrap();

        let items = ex.extract_items(&html, Some(&base), &Cleanup::default());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url.as_deref(), Some("https://rust-lang.org/"));
        assert_eq!(items[0].title.as_deref(), Some("Rust"));
        assert_eq!(items[0].text.as_deref(), Some("A language"));
        assert!(items[1].url.is_none());
        assert!(items[1].text.is_none());
    }
}

//! Priority-ordered parser chains.

use std::cmp::Ordering;

use url::Url;

use super::document::{ExtractedItem, Page};
use super::parser::CompiledParser;

/// Parsers for one target, highest priority first. Parsers without a
/// priority run after all prioritized ones; ties keep id order so every
/// worker resolves the chain the same way.
#[derive(Debug, Clone, Default)]
pub struct ParserChain {
    parsers: Vec<CompiledParser>,
}

/// A value and the parser that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted<T> {
    pub parser_id: String,
    pub value: T,
}

fn by_priority(a: &CompiledParser, b: &CompiledParser) -> Ordering {
    match (a.priority, b.priority) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

impl ParserChain {
    pub fn new(mut parsers: Vec<CompiledParser>) -> Self {
        parsers.sort_by(by_priority);
        Self { parsers }
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    pub fn parsers(&self) -> &[CompiledParser] {
        &self.parsers
    }

    fn applicable<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a CompiledParser> + 'a {
        self.parsers.iter().filter(move |p| p.applies_to(url))
    }

    /// First value any applicable parser finds in the URL.
    pub fn parse_url(&self, url: &str) -> Option<Extracted<String>> {
        let parsed = Url::parse(url).ok()?;
        self.applicable(url).find_map(|p| {
            p.parse_url(&parsed).map(|value| Extracted {
                parser_id: p.id.clone(),
                value,
            })
        })
    }

    /// First value any applicable parser finds in the document.
    pub fn parse_document_value(&self, url: &str, page: &Page) -> Option<Extracted<String>> {
        let base = Url::parse(url).ok();
        self.applicable(url).find_map(|p| {
            p.parse_document_value(page, base.as_ref())
                .map(|value| Extracted {
                    parser_id: p.id.clone(),
                    value,
                })
        })
    }

    /// Items from the first applicable parser that finds any.
    pub fn parse_document_items(&self, url: &str, page: &Page) -> Option<Extracted<Vec<ExtractedItem>>> {
        let base = Url::parse(url).ok();
        self.applicable(url).find_map(|p| {
            let items = p.parse_document_items(page, base.as_ref());
            (!items.is_empty()).then(|| Extracted {
                parser_id: p.id.clone(),
                value: items,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParserRecord, ParserTarget, ParserType};

    fn parser(param: &str, priority: Option<f32>, pattern: Option<&str>) -> CompiledParser {
        let mut record = ParserRecord::new(ParserTarget::UrlQuery, ParserType::QueryParameter);
        record.parameter = Some(param.to_string());
        record.priority = priority;
        record.url_pattern_regex = pattern.map(String::from);
        CompiledParser::try_from(&record.with_derived_id()).unwrap()
    }

    #[test]
    fn higher_priority_wins() {
        let chain = ParserChain::new(vec![
            parser("q", Some(1.0), None),
            parser("query", Some(5.0), None),
            parser("p", None, None),
        ]);
        let got = chain.parse_url("https://a.example/?q=low&query=high&p=none").unwrap();
        assert_eq!(got.value, "high");
        assert_eq!(chain.parsers().last().unwrap().priority, None);
    }

    #[test]
    fn falls_through_to_next_parser() {
        let chain = ParserChain::new(vec![parser("query", Some(5.0), None), parser("q", Some(1.0), None)]);
        assert_eq!(chain.parse_url("https://a.example/?q=x").unwrap().value, "x");
    }

    #[test]
    fn exhausted_chain_yields_none() {
        let chain = ParserChain::new(vec![parser("q", None, Some("bing"))]);
        assert!(chain.parse_url("https://google.com/?q=x").is_none());
        assert!(ParserChain::default().parse_url("https://google.com/?q=x").is_none());
    }
}

//! XPath extraction over archived HTML.
//!
//! Pages are parsed leniently by `scraper` and mirrored into an XML tree,
//! so XPath 1.0 expressions work on markup that is not well-formed XML.

use scraper::{ElementRef, Html, Node as HtmlNode};
use sxd_document::dom::{ChildOfElement, Document, Element};
use sxd_document::Package;
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value, XPath};
use tracing::debug;
use url::Url;

use super::cleanup::Cleanup;
use super::document::{query_parameter, resolve, ExtractedItem};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

/// Compile an expression, reporting the parse error as text.
pub(crate) fn compile(expression: &str) -> Result<XPath, String> {
    Factory::new()
        .build(expression)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "empty XPath expression".to_string())
}

/// Mirror an HTML tree into an XML document.
pub(crate) fn to_xml(html: &Html) -> Package {
    let package = Package::new();
    {
        let doc = package.as_document();
        let root = mirror_element(&doc, html.root_element());
        doc.root().append_child(root);
    }
    package
}

fn mirror_element<'d>(doc: &Document<'d>, source: ElementRef<'_>) -> Element<'d> {
    let value = source.value();
    let element = doc.create_element(value.name());
    for (name, attr) in value.attrs() {
        element.set_attribute_value(name, attr);
    }
    for child in source.children() {
        match child.value() {
            HtmlNode::Text(text) => {
                let text: &str = text;
                element.append_child(doc.create_text(text));
            }
            HtmlNode::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    element.append_child(mirror_element(doc, child));
                }
            }
            _ => {}
        }
    }
    element
}

/// Source expressions of an XPath parser. They are compiled on use; the
/// compiled form cannot be shared between threads.
#[derive(Debug, Clone)]
pub struct XPathExtractor {
    pub(crate) expression: String,
    pub(crate) url_parameter: Option<String>,
    pub(crate) url_xpath: Option<String>,
    pub(crate) title_xpath: Option<String>,
    pub(crate) text_xpath: Option<String>,
}

impl XPathExtractor {
    /// Every expression this extractor will evaluate.
    pub(crate) fn expressions(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.expression.as_str()).chain(
            [&self.url_xpath, &self.title_xpath, &self.text_xpath]
                .into_iter()
                .filter_map(|e| e.as_deref()),
        )
    }

    /// First non-empty value the expression selects.
    pub fn extract_value(&self, xml: &Package, base_url: Option<&Url>, cleanup: &Cleanup) -> Option<String> {
        let expression = compile(&self.expression).ok()?;
        let doc = xml.as_document();
        let context = Context::new();
        evaluate(&expression, &context, doc.root().into())
            .into_iter()
            .filter_map(|raw| match &self.url_parameter {
                Some(param) => query_parameter(&resolve(&raw, base_url)?, param),
                None => Some(raw),
            })
            .find_map(|raw| cleanup.apply(&raw))
    }

    /// Every selected block, in document order.
    pub fn extract_items(&self, xml: &Package, base_url: Option<&Url>, cleanup: &Cleanup) -> Vec<ExtractedItem> {
        let Ok(expression) = compile(&self.expression) else {
            return Vec::new();
        };
        let sub = |e: &Option<String>| e.as_deref().and_then(|e| compile(e).ok());
        let (url_xpath, title_xpath, text_xpath) =
            (sub(&self.url_xpath), sub(&self.title_xpath), sub(&self.text_xpath));

        let doc = xml.as_document();
        let context = Context::new();
        let nodes = match expression.evaluate(&context, doc.root()) {
            Ok(Value::Nodeset(nodes)) => nodes.document_order(),
            Ok(_) => return Vec::new(),
            Err(e) => {
                debug!("XPath {:?} failed: {}", self.expression, e);
                return Vec::new();
            }
        };

        nodes
            .into_iter()
            .map(|node| {
                let first = |xpath: &Option<XPath>| {
                    xpath
                        .as_ref()
                        .and_then(|x| evaluate(x, &context, node).into_iter().find_map(|v| cleanup.apply(&v)))
                };
                let raw_link = match &url_xpath {
                    Some(x) => evaluate(x, &context, node).into_iter().next(),
                    None => match node {
                        Node::Element(e) => e.attribute_value("href").map(String::from),
                        _ => None,
                    },
                };
                let url = raw_link.and_then(|raw| match &self.url_parameter {
                    Some(param) => query_parameter(&resolve(&raw, base_url)?, param),
                    None => Some(resolve(&raw, base_url).map(|u| u.to_string()).unwrap_or(raw)),
                });
                ExtractedItem {
                    content: serialize(node),
                    url,
                    title: first(&title_xpath),
                    text: first(&text_xpath),
                }
            })
            .collect()
    }
}

/// String values of an evaluation result, in document order.
fn evaluate<'d>(expression: &XPath, context: &Context<'d>, node: Node<'d>) -> Vec<String> {
    match expression.evaluate(context, node) {
        Ok(Value::Nodeset(nodes)) => nodes.document_order().into_iter().map(node_text).collect(),
        Ok(Value::String(s)) => vec![s],
        Ok(Value::Number(n)) if n.is_finite() => vec![n.to_string()],
        Ok(_) => Vec::new(),
        Err(e) => {
            debug!("XPath evaluation failed: {}", e);
            Vec::new()
        }
    }
}

/// Text of a node. Element text runs are joined with spaces, like the CSS
/// extractor does.
fn node_text(node: Node<'_>) -> String {
    match node {
        Node::Element(e) => {
            let mut parts = Vec::new();
            collect_text(e, &mut parts);
            parts.join(" ")
        }
        other => other.string_value(),
    }
}

fn collect_text(element: Element<'_>, parts: &mut Vec<String>) {
    for child in element.children() {
        match child {
            ChildOfElement::Text(t) => parts.push(t.text().to_string()),
            ChildOfElement::Element(e) => collect_text(e, parts),
            _ => {}
        }
    }
}

fn serialize(node: Node<'_>) -> String {
    match node {
        Node::Element(e) => {
            let mut out = String::new();
            write_element(e, &mut out);
            out
        }
        other => escape(&other.string_value(), false),
    }
}

fn write_element(element: Element<'_>, out: &mut String) {
    let name = element.name().local_part();
    out.push('<');
    out.push_str(name);
    for attr in element.attributes() {
        out.push(' ');
        out.push_str(attr.name().local_part());
        out.push_str("=\"");
        out.push_str(&escape(attr.value(), true));
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&name) {
        return;
    }
    for child in element.children() {
        match child {
            ChildOfElement::Text(t) => out.push_str(&escape(t.text(), false)),
            ChildOfElement::Element(e) => write_element(e, out),
            _ => {}
        }
    }
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(expression: &str) -> XPathExtractor {
        XPathExtractor {
            expression: expression.to_string(),
            url_parameter: None,
            url_xpath: None,
            title_xpath: None,
            text_xpath: None,
        }
    }

    #[test]
    fn attribute_value_from_lenient_html() {
        // Unclosed tags are not well-formed XML.
        let html = Html::parse_document(r#"<p>intro<input name="q" value=" rust  book "><br>"#);
        let xml = to_xml(&html);
        let ex = extractor("//input[@name='q']/@value");
        assert_eq!(ex.extract_value(&xml, None, &Cleanup::default()).as_deref(), Some("rust book"));
    }

    #[test]
    fn string_and_number_results() {
        let html = Html::parse_document("<title>rust - Search</title><ol><li>a</li><li>b</li></ol>");
        let xml = to_xml(&html);
        assert_eq!(
            extractor("substring-before(//title, ' -')")
                .extract_value(&xml, None, &Cleanup::default())
                .as_deref(),
            Some("rust")
        );
        assert_eq!(
            extractor("count(//li)").extract_value(&xml, None, &Cleanup::default()).as_deref(),
            Some("2")
        );
    }

    #[test]
    fn items_with_relative_expressions() {
        let html = Html::parse_document(
            r#"<div class="g"><a href="/url?q=https://rust-lang.org/&amp;sa=U"><h3>Rust</h3></a><span>A &amp; B</span></div>
               <div class="g"><a href="https://b.example/"><h3>B</h3></a></div>"#,
        );
        let xml = to_xml(&html);
        let mut ex = extractor("//div[@class='g']");
        ex.url_xpath = Some(".//a/@href".into());
        ex.url_parameter = Some("q".into());
        ex.title_xpath = Some(".//h3".into());
        ex.text_xpath = Some("./span".into());
        let base = Url::parse("https://www.google.com/search?q=rust").unwrap();

        let items = ex.extract_items(&xml, Some(&base), &Cleanup::default());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url.as_deref(), Some("https://rust-lang.org/"));
        assert_eq!(items[0].title.as_deref(), Some("Rust"));
        assert_eq!(items[0].text.as_deref(), Some("A & B"));
        assert!(items[0].content.starts_with(r#"<div class="g"><a href="/url?q=https://rust-lang.org/&amp;sa=U">"#));
        assert!(items[1].url.is_none());
        assert!(items[1].text.is_none());
    }

    #[test]
    fn bad_expression_does_not_compile() {
        assert!(compile("//div[").is_err());
        assert!(compile("//div[@id='x']").is_ok());
    }
}

use scraper::{ElementRef, Html, Selector};

use crate::utils::normalize_text;

/// A parsed HTML node: either an element or a bare text run.
///
/// Every accessor answers with an empty/`None` value instead of failing, so a missing node
/// degrades to soft-missing data at the call site.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Element(ElementRef<'a>),
    Text(&'a str),
}

impl<'a> Node<'a> {
    pub fn document(html: &'a Html) -> Self {
        Node::Element(html.root_element())
    }

    pub fn element(&self) -> Option<ElementRef<'a>> {
        match self {
            Node::Element(el) => Some(*el),
            Node::Text(_) => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self, Node::Element(_))
    }

    /// Descendants matching `selector`, in document order.
    pub fn select(&self, selector: &Selector) -> Vec<Node<'a>> {
        match self {
            Node::Element(el) => el.select(selector).map(Node::Element).collect(),
            Node::Text(_) => Vec::new(),
        }
    }

    pub fn first(&self, selector: &Selector) -> Option<Node<'a>> {
        match self {
            Node::Element(el) => el.select(selector).next().map(Node::Element),
            Node::Text(_) => None,
        }
    }

    /// Whitespace-normalised text content.
    pub fn text(&self) -> String {
        match self {
            Node::Element(el) => normalize_text(&el.text().collect::<String>()),
            Node::Text(text) => normalize_text(text),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        match self {
            Node::Element(el) => el.value().attr(name),
            Node::Text(_) => None,
        }
    }

    /// Direct children, text runs included; comments and blank text are skipped.
    pub fn children(&self) -> Vec<Node<'a>> {
        let Node::Element(el) = self else {
            return Vec::new();
        };
        el.children()
            .filter_map(|child| {
                if let Some(element) = ElementRef::wrap(child) {
                    return Some(Node::Element(element));
                }
                child
                    .value()
                    .as_text()
                    .map(|text| &**text)
                    .filter(|text| !text.trim().is_empty())
                    .map(Node::Text)
            })
            .collect()
    }

    pub fn element_children(&self) -> Vec<Node<'a>> {
        self.children()
            .into_iter()
            .filter(Node::is_element)
            .collect()
    }

    /// Every element below this one, depth first.
    pub fn next_element_sibling(&self) -> Option<Node<'a>> {
        self.element()?
            .next_siblings()
            .find_map(ElementRef::wrap)
            .map(Node::Element)
    }

    pub fn has_class(&self, class_name: &str) -> bool {
        self.attr("class")
            .map(|class| class.split_whitespace().any(|c| c == class_name))
            .unwrap_or(false)
    }
}

/// Counts from the end: `from_end(nodes, 1)` is the last node.
pub fn from_end<'a>(nodes: &[Node<'a>], n: usize) -> Option<Node<'a>> {
    if n == 0 || n > nodes.len() {
        return None;
    }
    nodes.get(nodes.len() - n).copied()
}

pub fn text_of(node: Option<Node<'_>>) -> String {
    node.map(|n| n.text()).unwrap_or_default()
}

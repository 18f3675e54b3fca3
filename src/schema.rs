//! Declarative extraction: each field is a chain of (selector, pick) rules tried in order.
//!
//! Upstream markup drifts; a moved node breaks one rule in one schema instead of scattered
//! traversal code.

use std::collections::HashMap;

use scraper::Selector;

use crate::dom::{from_end, Node};
use crate::utils::parse_int_safe;

/// What to read from the node a rule lands on.
#[derive(Debug, Clone, Copy)]
pub enum Pick {
    Text,
    Attr(&'static str),
    /// Element child counted from the end (1 = last).
    ChildFromEnd(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// `None` reads the scope node itself.
    pub scope: Option<&'static Selector>,
    pub pick: Pick,
}

impl Rule {
    pub fn at(selector: &'static Selector, pick: Pick) -> Self {
        Rule {
            scope: Some(selector),
            pick,
        }
    }

    pub fn own(pick: Pick) -> Self {
        Rule { scope: None, pick }
    }

    fn apply(&self, node: Node<'_>) -> Option<String> {
        let target = match self.scope {
            Some(selector) => node.first(selector)?,
            None => node,
        };
        let value = match self.pick {
            Pick::Text => target.text(),
            Pick::Attr(name) => target.attr(name)?.trim().to_string(),
            Pick::ChildFromEnd(n) => from_end(&target.element_children(), n)?.text(),
        };
        Some(value).filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub rules: Vec<Rule>,
}

impl Field {
    pub fn new(name: &'static str, rules: Vec<Rule>) -> Self {
        Field { name, rules }
    }

    /// First non-empty value along the chain.
    pub fn extract(&self, node: Node<'_>) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.apply(node))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Schema { fields }
    }

    pub fn extract(&self, node: Node<'_>) -> Record {
        let values = self
            .fields
            .iter()
            .filter_map(|field| field.extract(node).map(|value| (field.name, value)))
            .collect();
        Record { values }
    }
}

/// Values a schema pulled out of one node, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: HashMap<&'static str, String>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn string(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_string()
    }

    pub fn optional(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_string)
    }

    pub fn int(&self, name: &str) -> u32 {
        self.get(name).map(parse_int_safe).unwrap_or(0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

//! Query options carried after `?` in a request or topic.

use url::form_urlencoded;

use crate::error::QueryError;

/// Decoded system query options.
///
/// `$filter` is kept as expression text; evaluating it is the job of the
/// persistence backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filter: Option<String>,
    pub select: Vec<String>,
    pub expand: Vec<String>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub count: Option<bool>,
    pub orderby: Vec<String>,
}

impl Query {
    /// Parse a percent-encoded query string such as `$select=name&$top=2`
    pub fn parse(query: &str) -> Result<Query, QueryError> {
        let mut parsed = Query::default();
        let mut seen: Vec<String> = Vec::new();

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if key.is_empty() {
                continue;
            }
            if seen.iter().any(|k| *k == key) {
                return Err(QueryError::DuplicateOption(key.into_owned()));
            }
            seen.push(key.to_string());

            let value = value.trim().to_string();
            match key.as_ref() {
                "$filter" => parsed.filter = Some(value),
                "$select" => parsed.select = split_list(&value),
                "$expand" => parsed.expand = split_list(&value),
                "$orderby" => parsed.orderby = split_list(&value),
                "$top" => parsed.top = Some(parse_number("$top", &value)?),
                "$skip" => parsed.skip = Some(parse_number("$skip", &value)?),
                "$count" => {
                    parsed.count = Some(match value.as_str() {
                        "true" => true,
                        "false" => false,
                        _ => {
                            return Err(QueryError::InvalidValue {
                                option: "$count".to_string(),
                                value: value.clone(),
                            })
                        }
                    })
                }
                other => return Err(QueryError::UnknownOption(other.to_string())),
            }
        }

        Ok(parsed)
    }

    pub fn is_empty(&self) -> bool {
        *self == Query::default()
    }

    /// Names of the paging and ordering options present, in a fixed order
    pub fn paging_options(&self) -> Vec<&'static str> {
        let mut present = Vec::new();
        if self.top.is_some() {
            present.push("$top");
        }
        if self.skip.is_some() {
            present.push("$skip");
        }
        if self.count.is_some() {
            present.push("$count");
        }
        if !self.orderby.is_empty() {
            present.push("$orderby");
        }
        present
    }

    /// Navigation property names requested by `$expand`, nested options dropped
    pub fn expand_names(&self) -> impl Iterator<Item = &str> {
        self.expand
            .iter()
            .map(|item| item.split(['(', '/']).next().unwrap_or(item).trim())
    }

    /// Whether `property` survives `$select`; an empty select keeps everything
    pub fn selects(&self, property: &str) -> bool {
        self.select.is_empty() || self.select.iter().any(|s| s == property)
    }
}

/// Split a comma separated list, ignoring commas nested in parentheses
fn split_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for c in value.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                items.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    items.push(current.trim().to_string());
    items.retain(|item| !item.is_empty());
    items
}

fn parse_number(option: &str, value: &str) -> Result<u64, QueryError> {
    value.parse().map_err(|_| QueryError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
    })
}

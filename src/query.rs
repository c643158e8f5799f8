//! Query model: templates, parameter slots and binding.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

// Placeholder patterns for the two template dialects
static SPARQL_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%([A-Za-z_][A-Za-z0-9_]*)%").unwrap());

static SQL_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)@").unwrap());

/// Template dialect, which decides how placeholders are delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemplateSyntax {
    /// `%name%` placeholders
    #[default]
    Sparql,
    /// `@name@` placeholders
    Sql,
}

impl TemplateSyntax {
    fn placeholder(&self) -> &'static Regex {
        match self {
            TemplateSyntax::Sparql => &SPARQL_PLACEHOLDER,
            TemplateSyntax::Sql => &SQL_PLACEHOLDER,
        }
    }
}

/// Kind of a query, which decides how its result is measured and whether
/// it may run while updates are suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueryType {
    #[default]
    Select,
    Describe,
    Construct,
    Update,
}

impl QueryType {
    /// Update queries mutate the dataset and are suppressed during warm-up and ramp-up
    pub fn is_update(&self) -> bool {
        matches!(self, QueryType::Update)
    }

    /// SELECT results are measured in rows, everything else in bytes
    pub fn counts_rows(&self) -> bool {
        matches!(self, QueryType::Select)
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryType::Select => write!(f, "select"),
            QueryType::Describe => write!(f, "describe"),
            QueryType::Construct => write!(f, "construct"),
            QueryType::Update => write!(f, "update"),
        }
    }
}

impl std::str::FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "select" => Ok(QueryType::Select),
            "describe" => Ok(QueryType::Describe),
            "construct" => Ok(QueryType::Construct),
            "update" => Ok(QueryType::Update),
            _ => Err(format!("Unknown query type: {}", s)),
        }
    }
}

/// A named placeholder in a query template and the kind of value it takes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSlot {
    pub name: String,
    pub kind: String,
}

/// Parsed contents of a `query<N>desc.txt` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescription {
    pub query_type: QueryType,
    pub slots: Vec<ParameterSlot>,
}

impl QueryDescription {
    /// Parse a description: one `querytype=<type>` line plus `<placeholder> <kind>` lines.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut query_type = QueryType::default();
        let mut slots = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                if key.trim().eq_ignore_ascii_case("querytype") {
                    query_type = value.parse()?;
                    continue;
                }
                return Err(format!("Unknown description key: {}", key.trim()));
            }

            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(kind), None) => slots.push(ParameterSlot {
                    name: name.to_string(),
                    kind: kind.to_string(),
                }),
                _ => return Err(format!("Invalid parameter line: {}", line)),
            }
        }

        Ok(Self { query_type, slots })
    }
}

/// Immutable description of one parameterized query
#[derive(Debug, Clone)]
pub struct Query {
    nr: usize,
    query_type: QueryType,
    template: String,
    slots: Vec<ParameterSlot>,
    row_names: Vec<String>,
    syntax: TemplateSyntax,
}

impl Query {
    /// Create a query from its template text
    pub fn new(
        nr: usize,
        query_type: QueryType,
        template: impl Into<String>,
        syntax: TemplateSyntax,
    ) -> Self {
        Self {
            nr,
            query_type,
            template: template.into(),
            slots: Vec::new(),
            row_names: Vec::new(),
            syntax,
        }
    }

    /// Attach the parameter slots from the query description
    pub fn with_slots(mut self, slots: Vec<ParameterSlot>) -> Self {
        self.slots = slots;
        self
    }

    /// Attach expected row names (qualification mode)
    pub fn with_row_names(mut self, row_names: Vec<String>) -> Self {
        self.row_names = row_names;
        self
    }

    /// 1-based ordinal, unique within the combined run
    pub fn nr(&self) -> usize {
        self.nr
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn slots(&self) -> &[ParameterSlot] {
        &self.slots
    }

    pub fn row_names(&self) -> &[String] {
        &self.row_names
    }

    /// Bind concrete values (one per slot, in slot order) for one execution
    pub fn bind(&self, values: Vec<String>) -> Result<BoundQuery<'_>> {
        if values.len() != self.slots.len() {
            return Err(DriverError::Parameter(format!(
                "query {} expects {} parameters, got {}",
                self.nr,
                self.slots.len(),
                values.len()
            )));
        }

        let text = self
            .syntax
            .placeholder()
            .replace_all(&self.template, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match self.slots.iter().position(|slot| slot.name == name) {
                    Some(idx) => values[idx].clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned();

        Ok(BoundQuery {
            query: self,
            parameters: values,
            text,
        })
    }
}

/// A query with parameters bound for exactly one execution
#[derive(Debug, Clone)]
pub struct BoundQuery<'a> {
    query: &'a Query,
    parameters: Vec<String>,
    text: String,
}

impl<'a> BoundQuery<'a> {
    pub fn query(&self) -> &'a Query {
        self.query
    }

    pub fn nr(&self) -> usize {
        self.query.nr
    }

    pub fn query_type(&self) -> QueryType {
        self.query.query_type
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Rendered query text, ready to send
    pub fn text(&self) -> &str {
        &self.text
    }
}

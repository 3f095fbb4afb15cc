use std::fmt::{self, Display};

/// One `field op value` clause of a records query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Eq(String, String),
    Ge(String, String),
    Le(String, String),
    In(String, Vec<String>),
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

impl Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Eq(field, value) => write!(f, "{} = {}", field, quote(value)),
            Condition::Ge(field, value) => write!(f, "{} >= {}", field, quote(value)),
            Condition::Le(field, value) => write!(f, "{} <= {}", field, quote(value)),
            Condition::In(field, values) => {
                let items: Vec<String> = values.iter().map(|v| quote(v)).collect();
                write!(f, "{} in ({})", field, items.join(", "))
            }
        }
    }
}

/// Builder for the records API query language:
/// clauses joined with ` and `, then ` limit N offset M`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    conditions: Vec<Condition>,
    order_by: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Display) -> Self {
        self.conditions.push(Condition::Eq(field.to_string(), value.to_string()));
        self
    }

    pub fn ge(mut self, field: &str, value: impl Display) -> Self {
        self.conditions.push(Condition::Ge(field.to_string(), value.to_string()));
        self
    }

    pub fn le(mut self, field: &str, value: impl Display) -> Self {
        self.conditions.push(Condition::Le(field.to_string(), value.to_string()));
        self
    }

    pub fn in_list<I, T>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        let values: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
        if !values.is_empty() {
            self.conditions.push(Condition::In(field.to_string(), values));
        }
        self
    }

    pub fn order_by(mut self, field: &str, ascending: bool) -> Self {
        self.order_by = Some(format!("{} {}", field, if ascending { "asc" } else { "desc" }));
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn condition(&self) -> String {
        self.conditions
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" and ")
    }

    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        let condition = self.condition();
        if !condition.is_empty() {
            parts.push(condition);
        }
        if let Some(order) = &self.order_by {
            parts.push(format!("order by {}", order));
        }
        parts.push(format!("limit {} offset {}", self.limit, self.offset));
        parts.join(" ")
    }
}

impl Display for RecordQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

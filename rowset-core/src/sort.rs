use crate::{ConfigurationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    ASC,
    DESC,
}

/// One parsed sort directive: a field name and a direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDirective {
    pub field: String,
    pub order: Order,
}

impl SortDirective {
    /// Parses `"field"`, `"field ASC"` or `"field DESC"` (direction is case
    /// insensitive, default ascending). Anything else is a
    /// [`ConfigurationError`].
    pub fn parse(directive: &str) -> Result<Self> {
        let mut parts = directive.split_whitespace();
        let Some(field) = parts.next() else {
            return Err(ConfigurationError::new("empty sort directive").into());
        };
        let order = match parts.next() {
            None => Order::ASC,
            Some(direction) if direction.eq_ignore_ascii_case("asc") => Order::ASC,
            Some(direction) if direction.eq_ignore_ascii_case("desc") => Order::DESC,
            Some(direction) => {
                return Err(ConfigurationError::new(format!(
                    "unknown sort direction `{direction}` in `{directive}`"
                ))
                .into());
            }
        };
        if let Some(trailing) = parts.next() {
            return Err(ConfigurationError::new(format!(
                "unexpected `{trailing}` in sort directive `{directive}`"
            ))
            .into());
        }
        Ok(Self {
            field: field.to_owned(),
            order,
        })
    }

    pub fn parse_all(spec: &[&str]) -> Result<Vec<Self>> {
        spec.iter().map(|directive| Self::parse(directive)).collect()
    }
}

/// Iteration order rewrite, independent of [`sort`](crate::Collection::sort):
/// a (sub)permutation of the current key set. `Even` and `Odd` select by
/// zero-based position of the current order, so they compose with a
/// preceding sort.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum IterationMode {
    #[default]
    Straight,
    Reverse,
    Even,
    Odd,
}

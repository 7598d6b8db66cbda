//! PostgREST query-string builder

use std::fmt::Display;

/// Sort direction for `order=`.
#[derive(Debug, Clone, Copy)]
pub enum Order {
    Asc,
    Desc,
}

/// A table query, rendered as `/<table>?select=..&col=op.value..`.
#[derive(Debug, Clone)]
pub struct Query {
    table: &'static str,
    params: Vec<(String, String)>,
}

impl Query {
    pub fn table(table: &'static str) -> Self {
        Self {
            table,
            params: Vec::new(),
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.params.push(("select".to_string(), columns.to_string()));
        self
    }

    /// `column=eq.value`
    pub fn eq(mut self, column: &str, value: impl Display) -> Self {
        self.params
            .push((column.to_string(), format!("eq.{}", value)));
        self
    }

    /// `column=in.(a,b,c)`
    pub fn is_in<T: Display>(mut self, column: &str, values: &[T]) -> Self {
        let list = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.params
            .push((column.to_string(), format!("in.({})", list)));
        self
    }

    /// `or=(expr,expr)`; each expr in PostgREST logical syntax.
    pub fn or(mut self, exprs: &[String]) -> Self {
        self.params
            .push(("or".to_string(), format!("({})", exprs.join(","))));
        self
    }

    /// Append an ordering column; repeated calls add tie-breakers.
    pub fn order(mut self, column: &str, dir: Order) -> Self {
        let term = format!(
            "{}.{}",
            column,
            match dir {
                Order::Asc => "asc",
                Order::Desc => "desc",
            }
        );
        match self.params.iter_mut().find(|p| p.0 == "order") {
            Some((_, v)) => {
                v.push(',');
                v.push_str(&term);
            }
            None => self.params.push(("order".to_string(), term)),
        }
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.params.push(("limit".to_string(), n.to_string()));
        self
    }

    /// Render against a REST base URL (e.g. `https://x.supabase.co/rest/v1`).
    pub fn to_url(&self, rest_base: &str) -> String {
        let mut url = format!("{}/{}", rest_base.trim_end_matches('/'), self.table);
        if self.params.is_empty() {
            return url;
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish();
        url.push('?');
        url.push_str(&query);
        url
    }
}

/// `and(a.eq.x,b.eq.y)` logical expression for use inside `or=`.
pub fn and_eq(pairs: &[(&str, String)]) -> String {
    let inner = pairs
        .iter()
        .map(|(col, val)| format!("{}.eq.{}", col, val))
        .collect::<Vec<_>>()
        .join(",");
    format!("and({})", inner)
}

use quantscan_storage::SqlParam;

/// Accumulates SQL text and positional parameters together so the `?`
/// placeholders and the parameter list cannot drift apart.
#[derive(Debug, Default)]
pub(crate) struct SqlWriter {
    sql: String,
    params: Vec<SqlParam>,
}

impl SqlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    /// Append a single `?` bound to `value`.
    pub fn bind(&mut self, value: impl Into<SqlParam>) -> &mut Self {
        self.sql.push('?');
        self.params.push(value.into());
        self
    }

    /// Append `(?, ?, ...)` bound to `values`. Callers must not pass an
    /// empty slice.
    pub fn bind_list(&mut self, values: &[String]) -> &mut Self {
        self.sql.push('(');
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.bind(v.as_str());
        }
        self.sql.push(')');
        self
    }

    pub fn finish(self) -> (String, Vec<SqlParam>) {
        (self.sql, self.params)
    }
}

//! Member name templates.

/// Wraps every resolved member name in a prefix and suffix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    pub prefix: String,
    pub suffix: String,
}

impl Template {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn apply(&self, name: &str) -> String {
        format!("{}{name}{}", self.prefix, self.suffix)
    }
}

/// Substitute a bare group name into a printf-style filter template.
///
/// Every `%s` is replaced.
pub fn fill_filter_template(template: &str, name: &str) -> Option<String> {
    template
        .contains("%s")
        .then(|| template.replace("%s", name))
}

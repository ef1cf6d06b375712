use kube::ResourceExt;
use spreadsheet_controller_apis::Spreadsheet;

/// Identity of a [`Spreadsheet`] object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NamespacedName {
    pub name: String,
    pub namespace: String,
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl From<&Spreadsheet> for NamespacedName {
    fn from(o: &Spreadsheet) -> Self {
        Self::new(
            o.namespace().as_deref().unwrap_or(""),
            o.name_any().as_str(),
        )
    }
}

impl NamespacedName {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// The id handed to the formatter service, which uses it to name the
    /// generated spreadsheet files. Kept as plain `{namespace}{name}` for
    /// compatibility with existing reports.
    pub fn correlation_id(&self) -> String {
        format!("{}{}", self.namespace, self.name)
    }
}

pub(crate) fn metric_name(name: &str) -> String {
    format!("spreadsheet_controller_{}", name)
}

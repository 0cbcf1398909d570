use std::fmt;

/// Identity of one remote table. Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationCoordinates {
    project: String,
    dataset: String,
    table: String,
}

impl DestinationCoordinates {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `projects/{p}/datasets/{d}/tables/{t}`
    pub fn table_path(&self) -> String {
        format!(
            "projects/{}/datasets/{}/tables/{}",
            self.project, self.dataset, self.table
        )
    }

    /// Name of the table's default write stream.
    pub fn default_stream(&self) -> String {
        format!("{}/streams/_default", self.table_path())
    }
}

impl fmt::Display for DestinationCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_remote_resource_names() {
        let dest = DestinationCoordinates::new("proj", "logs", "events");
        assert_eq!(dest.table_path(), "projects/proj/datasets/logs/tables/events");
        assert_eq!(
            dest.default_stream(),
            "projects/proj/datasets/logs/tables/events/streams/_default"
        );
        assert_eq!(dest.to_string(), "proj.logs.events");
    }
}

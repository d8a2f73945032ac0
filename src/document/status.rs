/// Result of the last validation pass of a document.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ValidStatus {
    /// A field changed since the last validation.
    #[default]
    NotChecked,
    Valid,
    Invalid {
        reason: String,
        field_name: Option<String>,
    },
}

impl ValidStatus {
    pub fn invalid(reason: impl Into<String>, field_name: Option<&str>) -> Self {
        ValidStatus::Invalid {
            reason: reason.into(),
            field_name: field_name.map(str::to_string),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidStatus::Valid)
    }

    pub fn is_checked(&self) -> bool {
        !matches!(self, ValidStatus::NotChecked)
    }
}

/// Persistence state of a document. Owned by the workflow driving the
/// document; field changes never touch it.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    NotSaved,
    Saved,
    SaveError(String),
}

impl SaveStatus {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveStatus::Saved)
    }
}

use thiserror::Error;

/// Rule violations raised before any persistence or cache work happens.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: i64 },
    /// `message` is shown to the client as-is, so it names the field itself.
    #[error("invalid `{field}`: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// The offending request field, if this is a validation failure.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            Self::NotFound { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offender() {
        assert_eq!(
            DomainError::not_found("habit", 42).to_string(),
            "habit 42 does not exist"
        );
        let err = DomainError::validation("title", "title must not be empty");
        assert_eq!(err.field(), Some("title"));
        assert_eq!(err.to_string(), "invalid `title`: title must not be empty");
    }
}

//! Error categories for validation findings.

use serde::{Deserialize, Serialize};

/// Coarse classification of a validation finding, used for report
/// summaries and for selecting repair rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    UndeclaredElement,
    InvalidContentModel,
    InvalidElement,
    MissingAttribute,
    InvalidAttribute,
    EmptyElement,
    XmlSyntax,
    MissingFile,
    CorruptedFile,
    Extraction,
    DtdValidation,
    Validation,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UndeclaredElement => "Undeclared Element",
            ErrorCategory::InvalidContentModel => "Invalid Content Model",
            ErrorCategory::InvalidElement => "Invalid Element",
            ErrorCategory::MissingAttribute => "Missing Attribute",
            ErrorCategory::InvalidAttribute => "Invalid Attribute",
            ErrorCategory::EmptyElement => "Empty Element Error",
            ErrorCategory::XmlSyntax => "XML Syntax Error",
            ErrorCategory::MissingFile => "Missing File",
            ErrorCategory::CorruptedFile => "Corrupted File",
            ErrorCategory::Extraction => "Extraction Error",
            ErrorCategory::DtdValidation => "DTD Validation Error",
            ErrorCategory::Validation => "Validation Error",
        }
    }

    /// Classify a grammar-validation message by its wording.
    ///
    /// The substring checks are ordered; the first match wins.
    pub fn from_message(message: &str) -> ErrorCategory {
        let lower = message.to_lowercase();
        if lower.contains("no declaration") || lower.contains("not declared") {
            ErrorCategory::UndeclaredElement
        } else if lower.contains("does not follow") || lower.contains("content model") {
            ErrorCategory::InvalidContentModel
        } else if lower.contains("not allowed") || lower.contains("unexpected") {
            ErrorCategory::InvalidElement
        } else if lower.contains("required attribute") || lower.contains("missing") {
            ErrorCategory::MissingAttribute
        } else if lower.contains("invalid attribute") {
            ErrorCategory::InvalidAttribute
        } else if lower.contains("empty") {
            ErrorCategory::EmptyElement
        } else {
            ErrorCategory::DtdValidation
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_wording() {
        assert_eq!(
            ErrorCategory::from_message("No declaration for element 'section'"),
            ErrorCategory::UndeclaredElement
        );
        assert_eq!(
            ErrorCategory::from_message("Element 'chapter' content does not follow the declaration"),
            ErrorCategory::InvalidContentModel
        );
        assert_eq!(
            ErrorCategory::from_message("Element 'figure' is not allowed inside 'title'"),
            ErrorCategory::InvalidElement
        );
        assert_eq!(
            ErrorCategory::from_message("Element 'imagedata' is missing required attribute 'fileref'"),
            ErrorCategory::MissingAttribute
        );
        assert_eq!(
            ErrorCategory::from_message("Invalid attribute value 'BMP' for attribute 'format'"),
            ErrorCategory::InvalidAttribute
        );
        assert_eq!(
            ErrorCategory::from_message("Element 'imagedata' was declared EMPTY but has content"),
            ErrorCategory::EmptyElement
        );
        assert_eq!(
            ErrorCategory::from_message("something else entirely"),
            ErrorCategory::DtdValidation
        );
    }

    #[test]
    fn test_first_match_wins() {
        // Mentions both a missing attribute and an invalid one; the
        // missing-attribute check comes first.
        assert_eq!(
            ErrorCategory::from_message("required attribute with invalid attribute value"),
            ErrorCategory::MissingAttribute
        );
    }
}

//! Grammar validation of fragments and whole archives.
//!
//! The validator walks each fragment's tree against the DTD declaration
//! tables. Every finding carries the fragment entity name and a line
//! number local to that fragment's own source text, so a reader can open
//! `ch0002.xml` and go straight to the reported line.

pub mod category;

use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::archive::{Archive, Fragment};
use crate::dom::{NodeData, NodeId, XmlTree};
use crate::error::Result;
use crate::grammar::{AttrDefault, ContentModel, Dtd};

pub use category::ErrorCategory;

/// How serious a finding is. Only `Error` findings block compliance;
/// warnings and informational notes are reported but never terminate
/// the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    /// Entity name of the fragment the finding belongs to, e.g. `ch0002`.
    pub entity: Option<String>,
    /// 1-based line in the fragment's own source text.
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Name of the element the finding is attached to.
    pub element: Option<String>,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            severity: Severity::Error,
            message: message.into(),
            entity: None,
            line: None,
            column: None,
            element: None,
        }
    }

    pub fn warning(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::new(category, message)
        }
    }

    pub fn info(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            ..Self::new(category, message)
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_position(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(entity) = &self.entity {
            write!(f, "{}", entity)?;
            if let Some(line) = self.line {
                write!(f, ":{}", line)?;
            }
            write!(f, ": ")?;
        }
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// The full set of findings from one validation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = ValidationError>) {
        self.errors.extend(errors);
    }

    pub fn error_count(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| e.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| e.severity == Severity::Warning)
            .count()
    }

    /// Whether the package is compliant: no `Error`-severity findings.
    pub fn is_valid(&self) -> bool {
        self.error_count() == 0
    }

    /// Findings-per-category counts, for summary output.
    pub fn summary(&self) -> BTreeMap<ErrorCategory, usize> {
        let mut counts = BTreeMap::new();
        for error in &self.errors {
            *counts.entry(error.category).or_insert(0) += 1;
        }
        counts
    }

    /// Errors belonging to one fragment, in document order.
    pub fn for_entity<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a ValidationError> {
        self.errors
            .iter()
            .filter(move |e| e.entity.as_deref() == Some(entity))
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} error(s), {} warning(s)",
            self.error_count(),
            self.warning_count()
        )?;
        for (category, count) in self.summary() {
            writeln!(f, "  {}: {}", category, count)?;
        }
        for error in &self.errors {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

/// Walks fragment trees against a [`Dtd`].
pub struct Validator {
    dtd: Dtd,
}

impl Validator {
    pub fn new(dtd: Dtd) -> Self {
        Self { dtd }
    }

    /// Load the grammar from a `.dtd` file.
    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self::new(Dtd::load(path)?))
    }

    pub fn dtd(&self) -> &Dtd {
        &self.dtd
    }

    /// Validate every fragment of an archive.
    ///
    /// Fragments are checked in parallel; findings come back grouped in
    /// manifest entity order regardless of scheduling.
    pub fn validate_archive(&self, archive: &Archive) -> ValidationReport {
        let mut report = ValidationReport::new();
        let per_fragment: Vec<Vec<ValidationError>> = archive
            .fragments
            .par_iter()
            .map(|fragment| self.validate_fragment(fragment))
            .collect();
        for errors in per_fragment {
            report.extend(errors);
        }
        debug!(
            "validated {} fragment(s): {} error(s)",
            archive.fragments.len(),
            report.error_count()
        );
        report
    }

    /// Validate one fragment. An unparsable fragment yields a single
    /// syntax-error finding.
    pub fn validate_fragment(&self, fragment: &Fragment) -> Vec<ValidationError> {
        match &fragment.tree {
            Some(tree) => self.validate_tree(tree, &fragment.entity),
            None => {
                let parse_error = fragment
                    .parse_error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "fragment could not be parsed".to_string());
                let mut error = ValidationError::new(ErrorCategory::XmlSyntax, parse_error)
                    .with_entity(&fragment.entity);
                if let Some(parse) = &fragment.parse_error
                    && let (Some(line), Some(column)) = (parse.line, parse.column)
                {
                    error = error.with_position(line, column);
                }
                vec![error]
            }
        }
    }

    /// Validate a parsed tree, attributing findings to `entity`.
    pub fn validate_tree(&self, tree: &XmlTree, entity: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for id in tree.descendants(tree.document()) {
            if tree.is_element(id) {
                self.check_element(tree, id, entity, &mut errors);
            }
        }
        errors
    }

    fn check_element(
        &self,
        tree: &XmlTree,
        id: NodeId,
        entity: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(name) = tree.element_name(id) else {
            return;
        };
        let position = tree.position(id);
        let report = |errors: &mut Vec<ValidationError>, category, message: String| {
            let mut error = ValidationError::new(category, message)
                .with_entity(entity)
                .with_element(name);
            if let Some((line, column)) = position {
                error = error.with_position(line, column);
            }
            errors.push(error);
        };

        let Some(decl) = self.dtd.element(name) else {
            report(
                errors,
                ErrorCategory::UndeclaredElement,
                format!("No declaration for element '{}'", name),
            );
            return;
        };

        match &decl.content {
            ContentModel::Any => {}
            ContentModel::Empty => {
                if tree.has_content(id) {
                    report(
                        errors,
                        ErrorCategory::EmptyElement,
                        format!("Element '{}' was declared EMPTY but has content", name),
                    );
                }
            }
            ContentModel::Mixed(allowed) => {
                for child in tree.children(id) {
                    if let Some(child_name) = tree.element_name(child)
                        && !allowed.iter().any(|a| a == child_name)
                    {
                        report(
                            errors,
                            ErrorCategory::InvalidElement,
                            format!(
                                "Element '{}' is not allowed inside '{}'",
                                child_name, name
                            ),
                        );
                    }
                }
            }
            ContentModel::Children(particle) => {
                for child in tree.children(id) {
                    if let Some(node) = tree.get(child)
                        && let NodeData::Text(text) = &node.data
                        && !text.trim().is_empty()
                    {
                        report(
                            errors,
                            ErrorCategory::InvalidElement,
                            format!("Character data is not allowed inside element '{}'", name),
                        );
                        break;
                    }
                }
                let children = tree.child_element_names(id);
                if !particle.matches(&children) {
                    report(
                        errors,
                        ErrorCategory::InvalidContentModel,
                        format!(
                            "Element '{}' content does not follow the declaration: expected {}, found ({})",
                            name,
                            particle,
                            children.join(", ")
                        ),
                    );
                }
            }
        }

        self.check_attributes(tree, id, name, &report, errors);
    }

    fn check_attributes(
        &self,
        tree: &XmlTree,
        id: NodeId,
        name: &str,
        report: &impl Fn(&mut Vec<ValidationError>, ErrorCategory, String),
        errors: &mut Vec<ValidationError>,
    ) {
        let decls = self.dtd.attributes(name);

        for decl in decls {
            match (tree.get_attr(id, &decl.name), &decl.default) {
                (None, AttrDefault::Required) => {
                    report(
                        errors,
                        ErrorCategory::MissingAttribute,
                        format!(
                            "Element '{}' is missing required attribute '{}'",
                            name, decl.name
                        ),
                    );
                }
                (Some(value), AttrDefault::Fixed(fixed)) if value != fixed => {
                    report(
                        errors,
                        ErrorCategory::InvalidAttribute,
                        format!(
                            "Invalid attribute value '{}' for attribute '{}' on element '{}': must be the fixed value '{}'",
                            value, decl.name, name, fixed
                        ),
                    );
                }
                (Some(value), _) => {
                    if let Some(allowed) = &decl.values
                        && !allowed.iter().any(|a| a == value)
                    {
                        report(
                            errors,
                            ErrorCategory::InvalidAttribute,
                            format!(
                                "Invalid attribute value '{}' for attribute '{}' on element '{}': expected one of {}",
                                value,
                                decl.name,
                                name,
                                allowed.join(" | ")
                            ),
                        );
                    }
                }
                (None, _) => {}
            }
        }

        // Attributes present on the element but absent from its list.
        if let Some(node) = tree.get(id)
            && let NodeData::Element { attrs, .. } = &node.data
        {
            for attr in attrs {
                if !decls.iter().any(|d| d.name == attr.name) {
                    report(
                        errors,
                        ErrorCategory::InvalidAttribute,
                        format!(
                            "Invalid attribute '{}' is not permitted on element '{}'",
                            attr.name, name
                        ),
                    );
                }
            }
        }
    }
}

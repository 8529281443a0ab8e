//! Rule-based repair of fragment trees.
//!
//! Each [`RepairRule`] scans a fragment tree for one class of grammar
//! problem and rewrites it in place. Rules are idempotent and run in a
//! fixed order; every change they make is reported as a [`FixRecord`].
//! Any fix that touches element content is flagged for human
//! verification, so nothing silently rewrites the text of a book.

pub mod rules;

use std::collections::BTreeMap;

use log::{debug, info};
use serde::Serialize;

use crate::archive::{Archive, Fragment};
use crate::dom::XmlTree;

pub use rules::{default_rules, grammar_rules};

/// One change applied by a repair rule.
#[derive(Debug, Clone, Serialize)]
pub struct FixRecord {
    /// Stable name of the rule that made the change.
    pub rule: &'static str,
    /// Entity of the fragment that was changed.
    pub entity: String,
    /// Element the change centered on.
    pub element: String,
    /// Line of that element in the fragment source before the change.
    pub line: Option<u32>,
    pub description: String,
    /// True when the fix changed element content rather than just an
    /// attribute value.
    pub needs_verification: bool,
    /// Why this change needs a human to look at it.
    pub reason: Option<String>,
    /// What that human should consider doing.
    pub suggestion: Option<String>,
}

/// All changes from one repair pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FixReport {
    pub records: Vec<FixRecord>,
}

impl FixReport {
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fixes a human should look at afterwards.
    pub fn verification_count(&self) -> usize {
        self.records.iter().filter(|r| r.needs_verification).count()
    }

    /// Change counts per rule name.
    pub fn by_rule(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.rule).or_insert(0) += 1;
        }
        counts
    }
}

impl std::fmt::Display for FixReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} fix(es), {} needing verification",
            self.count(),
            self.verification_count()
        )?;
        for record in &self.records {
            write!(f, "  [{}] {}", record.rule, record.entity)?;
            if let Some(line) = record.line {
                write!(f, ":{}", line)?;
            }
            writeln!(f, " {}", record.description)?;
            if let Some(reason) = &record.reason {
                writeln!(f, "    reason: {}", reason)?;
            }
            if let Some(suggestion) = &record.suggestion {
                writeln!(f, "    suggestion: {}", suggestion)?;
            }
        }
        Ok(())
    }
}

/// A single repair strategy.
pub trait RepairRule: Sync {
    fn name(&self) -> &'static str;

    /// Apply the rule to one fragment tree, returning a record per
    /// change made. Must be a no-op on trees it has nothing to fix.
    fn apply(&self, tree: &mut XmlTree, entity: &str) -> Vec<FixRecord>;
}

/// Runs the rule set over fragments and archives.
pub struct Fixer {
    rules: Vec<Box<dyn RepairRule>>,
}

impl Default for Fixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixer {
    /// A fixer with the standard rule set in its standard order.
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    /// A fixer that also repairs against a grammar: required attributes
    /// that are missing get flagged placeholder values.
    pub fn with_grammar(dtd: crate::grammar::Dtd) -> Self {
        Self {
            rules: grammar_rules(dtd),
        }
    }

    pub fn with_rules(rules: Vec<Box<dyn RepairRule>>) -> Self {
        Self { rules }
    }

    /// Repair one fragment in place. Unparsable fragments are left
    /// untouched; their raw source is not something rules can reason
    /// about.
    pub fn fix_fragment(&self, fragment: &mut Fragment) -> Vec<FixRecord> {
        let Some(tree) = fragment.tree.as_mut() else {
            return Vec::new();
        };
        let mut records = Vec::new();
        for rule in &self.rules {
            let applied = rule.apply(tree, &fragment.entity);
            if !applied.is_empty() {
                debug!(
                    "{}: rule {} made {} change(s)",
                    fragment.entity,
                    rule.name(),
                    applied.len()
                );
            }
            records.extend(applied);
        }
        if !records.is_empty() {
            fragment.sync_source();
        }
        records
    }

    /// Repair every fragment of an archive, in entity order.
    pub fn fix_archive(&self, archive: &mut Archive) -> FixReport {
        let mut report = FixReport::default();
        for fragment in &mut archive.fragments {
            report.records.extend(self.fix_fragment(fragment));
        }
        if !report.is_empty() {
            info!(
                "applied {} fix(es) across {} fragment(s)",
                report.count(),
                archive.fragments.len()
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unparsable_fragment_untouched() {
        let mut fragment =
            Fragment::from_source("ch0001", "ch0001.xml", 0, "<chapter><broken");
        let records = Fixer::new().fix_fragment(&mut fragment);
        assert!(records.is_empty());
        assert_eq!(fragment.source, "<chapter><broken");
    }

    #[test]
    fn test_report_accounting() {
        let mut report = FixReport::default();
        report.records.push(FixRecord {
            rule: "a",
            entity: "ch0001".into(),
            element: "para".into(),
            line: Some(3),
            description: "did a thing".into(),
            needs_verification: true,
            reason: Some("content changed".into()),
            suggestion: Some("check the result".into()),
        });
        report.records.push(FixRecord {
            rule: "a",
            entity: "ch0001".into(),
            element: "tgroup".into(),
            line: None,
            description: "did another".into(),
            needs_verification: false,
            reason: None,
            suggestion: None,
        });
        assert_eq!(report.count(), 2);
        assert_eq!(report.verification_count(), 1);
        assert_eq!(report.by_rule().get("a"), Some(&2));
        let shown = report.to_string();
        assert!(shown.contains("reason: content changed"));
        assert!(shown.contains("suggestion: check the result"));
    }
}

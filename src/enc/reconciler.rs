//! Assembly reference reconciliation across generations.
//!
//! Every generation appends to one evolving `AssemblyRef` table. When a new compilation
//! uses a reference, the reconciler looks for a committed row with the same identity key
//! (name, culture, public key token, extern alias) and reuses it; otherwise it appends a
//! row. A reused row keeps its committed version: a different version for the same key is
//! a conflict unless a wildcard pattern of either side explains both versions, in which
//! case the committed version wins and nothing is rewritten.
//!
//! The reconciler reports one [`ReferenceOutcome`] per reference and never decides the
//! fate of the whole emission; the emitter turns conflicts into diagnostics.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::{
    enc::Diagnostic,
    metadata::{
        identity::{AssemblyIdentity, AssemblyVersion, VersionPattern},
        tables::TableId,
        token::Token,
    },
    symbols::MetadataReference,
    Error, Result,
};

/// Identity key of an `AssemblyRef` row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceKey {
    /// Simple name.
    pub name: String,
    /// Culture, `None` if neutral.
    pub culture: Option<String>,
    /// Public key token, `None` if weakly named.
    pub public_key_token: Option<u64>,
    /// Extern alias.
    pub alias: Option<String>,
}

impl ReferenceKey {
    /// Key of `identity` seen through `alias`.
    #[must_use]
    pub fn new(identity: &AssemblyIdentity, alias: Option<&str>) -> Self {
        Self {
            name: identity.name.clone(),
            culture: identity.culture.clone(),
            public_key_token: identity.public_key_token(),
            alias: alias.map(str::to_string),
        }
    }

    /// Key of a declared reference.
    #[must_use]
    pub fn of(reference: &MetadataReference) -> Self {
        Self::new(&reference.identity, reference.alias.as_deref())
    }
}

/// One committed `AssemblyRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRefEntry {
    /// Row id.
    pub rid: u32,
    /// Identity written in the row.
    pub identity: AssemblyIdentity,
    /// Extern alias the row was introduced under.
    pub alias: Option<String>,
    /// Version pattern of the referenced assembly, if known.
    pub pattern: Option<VersionPattern>,
}

impl AssemblyRefEntry {
    /// Identity key of the row.
    #[must_use]
    pub fn key(&self) -> ReferenceKey {
        ReferenceKey::new(&self.identity, self.alias.as_deref())
    }
}

/// The evolving `AssemblyRef` table of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyRefTable {
    entries: Vec<AssemblyRefEntry>,
}

impl AssemblyRefTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row and returns its id.
    ///
    /// # Errors
    /// Returns [`crate::Error::TokenExhausted`] if the table has no row ids left.
    pub fn push(
        &mut self,
        identity: AssemblyIdentity,
        alias: Option<String>,
        pattern: Option<VersionPattern>,
    ) -> Result<u32> {
        let rid = u32::try_from(self.entries.len() + 1)
            .ok()
            .filter(|rid| *rid <= Token::MAX_ROW)
            .ok_or(Error::TokenExhausted(TableId::AssemblyRef))?;

        self.entries.push(AssemblyRefEntry {
            rid,
            identity,
            alias,
            pattern,
        });
        Ok(rid)
    }

    /// Rows in row order.
    #[must_use]
    pub fn entries(&self) -> &[AssemblyRefEntry] {
        &self.entries
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Row with id `rid`.
    #[must_use]
    pub fn get(&self, rid: u32) -> Option<&AssemblyRefEntry> {
        self.entries.get(rid.checked_sub(1)? as usize)
    }

    /// Rows with identity key `key`.
    pub fn find<'a>(&'a self, key: &'a ReferenceKey) -> impl Iterator<Item = &'a AssemblyRefEntry> + 'a {
        self.entries.iter().filter(move |entry| entry.key() == *key)
    }

    /// Returns true if a row with identity key `key` exists.
    #[must_use]
    pub fn contains(&self, key: &ReferenceKey) -> bool {
        self.find(key).next().is_some()
    }
}

/// Result of reconciling one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceOutcome {
    /// A committed row is reused.
    Reused {
        /// Row id.
        rid: u32,
    },
    /// A new row was appended.
    Added {
        /// Row id.
        rid: u32,
    },
    /// The committed row has a version no pattern explains.
    VersionChanged {
        /// Dependency name.
        name: String,
        /// Committed version.
        old: AssemblyVersion,
        /// Version of the new compilation's reference.
        new: AssemblyVersion,
    },
    /// More than one row or reference shares the identity key.
    Ambiguous {
        /// Dependency name.
        name: String,
        /// Extern alias.
        alias: Option<String>,
    },
}

impl ReferenceOutcome {
    /// Row id for reused and added rows.
    #[must_use]
    pub fn rid(&self) -> Option<u32> {
        match self {
            ReferenceOutcome::Reused { rid } | ReferenceOutcome::Added { rid } => Some(*rid),
            _ => None,
        }
    }

    /// The diagnostic a failed outcome maps to.
    #[must_use]
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        match self {
            ReferenceOutcome::VersionChanged { name, old, new } => Some(
                Diagnostic::reference_version_changed(name.clone(), old.to_string(), new.to_string()),
            ),
            ReferenceOutcome::Ambiguous { name, alias } => {
                Some(Diagnostic::ambiguous_reference(name.clone(), alias.as_deref()))
            }
            _ => None,
        }
    }
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    /// The table after appending every added row.
    pub table: AssemblyRefTable,
    /// One outcome per input reference, in input order.
    pub outcomes: Vec<ReferenceOutcome>,
}

impl ReconciliationResult {
    /// Diagnostics of all failed outcomes.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.outcomes
            .iter()
            .filter_map(ReferenceOutcome::diagnostic)
            .collect()
    }

    /// Returns true if any reference failed to reconcile.
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.rid().is_none())
    }
}

/// Maps the references a compilation uses onto an `AssemblyRef` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblyReferenceReconciler;

impl AssemblyReferenceReconciler {
    /// Reconciles `references` against `table`.
    ///
    /// Appends a row for every reference without a committed counterpart; the input table
    /// is left untouched.
    ///
    /// # Errors
    /// Returns [`crate::Error::TokenExhausted`] if the table runs out of row ids.
    pub fn reconcile<'a>(
        table: &AssemblyRefTable,
        references: impl IntoIterator<Item = &'a MetadataReference>,
    ) -> Result<ReconciliationResult> {
        let references: Vec<&MetadataReference> = references.into_iter().collect();

        let mut declared: HashMap<ReferenceKey, usize> = HashMap::new();
        for reference in &references {
            *declared.entry(ReferenceKey::of(reference)).or_default() += 1;
        }

        let mut result = table.clone();
        let mut outcomes = Vec::with_capacity(references.len());
        for reference in references {
            let key = ReferenceKey::of(reference);
            let identity = &reference.identity;

            let committed: Vec<&AssemblyRefEntry> = table.find(&key).collect();
            let outcome = if declared.get(&key).copied().unwrap_or(0) > 1 || committed.len() > 1 {
                ReferenceOutcome::Ambiguous {
                    name: identity.name.clone(),
                    alias: reference.alias.clone(),
                }
            } else if let Some(entry) = committed.first() {
                if entry.identity.version == identity.version
                    || wildcard_equivalent(entry, reference)
                {
                    ReferenceOutcome::Reused { rid: entry.rid }
                } else {
                    ReferenceOutcome::VersionChanged {
                        name: identity.name.clone(),
                        old: entry.identity.version,
                        new: identity.version,
                    }
                }
            } else {
                let rid = result.push(
                    identity.clone(),
                    reference.alias.clone(),
                    reference.pattern,
                )?;
                ReferenceOutcome::Added { rid }
            };

            match &outcome {
                ReferenceOutcome::Reused { rid } => debug!(
                    assembly = %identity.name,
                    rid,
                    version = %identity.version,
                    "reusing assembly reference"
                ),
                ReferenceOutcome::Added { rid } => debug!(
                    assembly = %identity.name,
                    rid,
                    version = %identity.version,
                    "adding assembly reference"
                ),
                ReferenceOutcome::VersionChanged { name, old, new } => warn!(
                    assembly = %name,
                    %old,
                    %new,
                    "assembly reference version changed"
                ),
                ReferenceOutcome::Ambiguous { name, alias } => warn!(
                    assembly = %name,
                    alias = alias.as_deref().unwrap_or_default(),
                    "ambiguous assembly reference"
                ),
            }
            outcomes.push(outcome);
        }

        Ok(ReconciliationResult {
            table: result,
            outcomes,
        })
    }
}

/// Only the pattern committed with the row can excuse a version change.
fn wildcard_equivalent(entry: &AssemblyRefEntry, reference: &MetadataReference) -> bool {
    let old = entry.identity.version;
    let new = reference.identity.version;

    entry
        .pattern
        .is_some_and(|pattern| pattern.is_wildcard() && pattern.admits(&old) && pattern.admits(&new))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str, version: &str) -> MetadataReference {
        MetadataReference::new(AssemblyIdentity::new(
            name,
            AssemblyVersion::parse(version).unwrap(),
            None,
            None,
        ))
    }

    fn committed(references: &[&MetadataReference]) -> AssemblyRefTable {
        AssemblyReferenceReconciler::reconcile(&AssemblyRefTable::new(), references.iter().copied())
            .unwrap()
            .table
    }

    #[test]
    fn reuse_and_append() {
        let runtime = reference("System.Runtime", "8.0.0.0");
        let table = committed(&[&runtime]);

        let lib = reference("Lib", "1.0.0.0");
        let result = AssemblyReferenceReconciler::reconcile(&table, [&lib, &runtime]).unwrap();

        assert_eq!(
            result.outcomes,
            vec![ReferenceOutcome::Added { rid: 2 }, ReferenceOutcome::Reused { rid: 1 }]
        );
        assert_eq!(result.table.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(!result.has_conflicts());
    }

    #[test]
    fn version_change_is_reported() {
        let table = committed(&[&reference("Lib", "1.0.0.0")]);
        let result =
            AssemblyReferenceReconciler::reconcile(&table, [&reference("Lib", "2.0.0.0")]).unwrap();

        assert!(result.has_conflicts());
        let diagnostics = result.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].arguments, ["Lib", "1.0.0.0", "2.0.0.0"]);
    }

    #[test]
    fn wildcard_keeps_committed_version() {
        let pattern = VersionPattern::parse("1.0.*").unwrap();
        let table = committed(&[&reference("Lib", "1.0.6000.100").with_pattern(pattern)]);

        let rebuilt = reference("Lib", "1.0.6001.2000").with_pattern(pattern);
        let result = AssemblyReferenceReconciler::reconcile(&table, [&rebuilt]).unwrap();

        assert_eq!(result.outcomes, vec![ReferenceOutcome::Reused { rid: 1 }]);
        assert_eq!(
            result.table.get(1).unwrap().identity.version,
            AssemblyVersion::new(1, 0, 6000, 100)
        );
    }

    #[test]
    fn fixed_pattern_does_not_excuse_changes() {
        let table = committed(&[&reference("Lib", "1.0.0.0")]);
        let changed = reference("Lib", "1.0.0.1")
            .with_pattern(VersionPattern::parse("1.0.0.1").unwrap());
        let result = AssemblyReferenceReconciler::reconcile(&table, [&changed]).unwrap();
        assert!(result.has_conflicts());
    }

    #[test]
    fn new_wildcard_does_not_excuse_fixed_row() {
        let table = committed(&[&reference("Lib", "1.0.0.0")]);
        let rebuilt = reference("Lib", "1.0.9000.1800")
            .with_pattern(VersionPattern::parse("1.0.*").unwrap());
        let result = AssemblyReferenceReconciler::reconcile(&table, [&rebuilt]).unwrap();

        assert!(result.has_conflicts());
        assert_eq!(
            result.outcomes,
            vec![ReferenceOutcome::VersionChanged {
                name: "Lib".to_string(),
                old: AssemblyVersion::new(1, 0, 0, 0),
                new: AssemblyVersion::new(1, 0, 9000, 1800),
            }]
        );
        assert_eq!(
            result.diagnostics()[0].code,
            crate::enc::DiagnosticCode::ReferenceVersionChanged
        );
    }

    #[test]
    fn aliases_are_independent_identities() {
        let plain = reference("Lib", "1.0.0.0");
        let aliased = reference("Lib", "2.0.0.0").with_alias("V2");
        let table = committed(&[&plain, &aliased]);
        assert_eq!(table.len(), 2);

        let aliased_changed = reference("Lib", "3.0.0.0").with_alias("V2");
        let result = AssemblyReferenceReconciler::reconcile(&table, [&plain, &aliased_changed]).unwrap();
        assert_eq!(result.outcomes[0], ReferenceOutcome::Reused { rid: 1 });
        assert!(matches!(
            result.outcomes[1],
            ReferenceOutcome::VersionChanged { ref name, .. } if name == "Lib"
        ));
    }

    #[test]
    fn duplicate_keys_are_ambiguous() {
        let first = reference("Lib", "1.0.0.0");
        let second = reference("Lib", "1.0.0.0");
        let result =
            AssemblyReferenceReconciler::reconcile(&AssemblyRefTable::new(), [&first, &second]).unwrap();

        assert!(result
            .outcomes
            .iter()
            .all(|outcome| matches!(outcome, ReferenceOutcome::Ambiguous { .. })));
        assert!(result.table.is_empty());
    }
}

//! References from a compilation to other assemblies.

use std::collections::BTreeMap;

use crate::{
    metadata::identity::{AssemblyIdentity, VersionPattern},
    symbols::{Compilation, TypePath},
};

/// A reference declared by a compilation.
///
/// The identity carries the concrete version the reference resolved to; `pattern` keeps
/// the version as the referenced assembly declared it, so a wildcard-built dependency can
/// be recognized across rebuilds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataReference {
    /// Identity of the referenced assembly.
    pub identity: AssemblyIdentity,
    /// The version as declared by the referenced assembly, if known.
    pub pattern: Option<VersionPattern>,
    /// Extern alias under which the reference is visible.
    pub alias: Option<String>,
    /// Types the reference exports, mapped to whether they are value types.
    pub exported_types: BTreeMap<TypePath, bool>,
    /// Whether this is the core library (`System.Object` lives here).
    pub core_library: bool,
}

impl MetadataReference {
    /// A reference exporting nothing yet.
    #[must_use]
    pub fn new(identity: AssemblyIdentity) -> Self {
        Self {
            identity,
            pattern: None,
            alias: None,
            exported_types: BTreeMap::new(),
            core_library: false,
        }
    }

    /// References the output of another compilation, exporting all of its types.
    #[must_use]
    pub fn from_compilation(compilation: &Compilation, alias: Option<String>) -> Self {
        let exported_types = compilation
            .types()
            .filter_map(|(handle, symbol)| {
                compilation
                    .type_path(handle)
                    .map(|path| (path, symbol.is_value_type))
            })
            .collect();

        Self {
            identity: compilation.identity(),
            pattern: Some(compilation.version_pattern()),
            alias,
            exported_types,
            core_library: false,
        }
    }

    /// Sets the extern alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Records the declared version pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: VersionPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Adds an exported type.
    #[must_use]
    pub fn export(mut self, path: TypePath, is_value_type: bool) -> Self {
        self.exported_types.insert(path, is_value_type);
        self
    }

    /// Marks this reference as the core library.
    #[must_use]
    pub fn as_core_library(mut self) -> Self {
        self.core_library = true;
        self
    }

    /// Returns true if the reference exports `path`.
    #[must_use]
    pub fn exports(&self, path: &TypePath) -> bool {
        self.exported_types.contains_key(path)
    }
}

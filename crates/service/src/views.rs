//! Named import scopes.
//!
//! A view maps bare class names to fully qualified ones through a list
//! of single-class imports and wildcard package imports. Lookup walks
//! the imports in insertion order and asks the reflection capability
//! whether each candidate exists, so the first matching import wins
//! regardless of kind.

use std::any::Any;

use parking_lot::RwLock;

use crate::objects::{HostObject, HostValue};

pub const VIEW_TYPE: &str = "bridge.View";

/// Name of the view every gateway installs at startup under the well
/// known id `j`.
pub const DEFAULT_VIEW_NAME: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Import {
    /// `a.b.Klass`
    Single(String),
    /// `a.b.*`, stored without the trailing `.*`.
    Wildcard(String),
}

pub struct View {
    name: String,
    imports: RwLock<Vec<Import>>,
}

impl View {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            imports: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records an import. Re-adding an existing import keeps its
    /// original position.
    pub fn add_import(&self, import: &str) {
        let import = parse(import);
        let mut imports = self.imports.write();
        if !imports.contains(&import) {
            imports.push(import);
        }
    }

    pub fn remove_import(&self, import: &str) -> bool {
        let import = parse(import);
        let mut imports = self.imports.write();
        match imports.iter().position(|item| *item == import) {
            Some(index) => {
                imports.remove(index);
                true
            }
            None => false,
        }
    }

    /// Resolves a bare name against the imports, probing candidates
    /// through `class_exists`. The name itself is tried first so fully
    /// qualified input passes through unchanged.
    pub fn resolve(&self, name: &str, class_exists: &dyn Fn(&str) -> bool) -> Option<String> {
        if class_exists(name) {
            return Some(name.to_string());
        }

        for import in self.imports.read().iter() {
            let candidate = match import {
                Import::Single(fqn) => {
                    if fqn.rsplit('.').next() != Some(name) {
                        continue;
                    }

                    fqn.clone()
                }
                Import::Wildcard(package) => format!("{}.{}", package, name),
            };

            if class_exists(&candidate) {
                return Some(candidate);
            }
        }

        None
    }

    pub fn imports(&self) -> Vec<String> {
        self.imports
            .read()
            .iter()
            .map(|import| match import {
                Import::Single(fqn) => fqn.clone(),
                Import::Wildcard(package) => format!("{}.*", package),
            })
            .collect()
    }
}

fn parse(import: &str) -> Import {
    match import.strip_suffix(".*") {
        Some(package) => Import::Wildcard(package.to_string()),
        None => Import::Single(import.to_string()),
    }
}

impl HostObject for View {
    fn type_name(&self) -> &str {
        VIEW_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn invoke(
        &self,
        name: &str,
        _args: &[HostValue],
    ) -> Option<Result<HostValue, crate::BridgeError>> {
        match name {
            "getName" => Some(Ok(HostValue::Str(self.name.clone()))),
            _ => None,
        }
    }
}

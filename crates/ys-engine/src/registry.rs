//! Central registry of named selections and variables.
//!
//! Regions and analysis code refer to selections and variables by name;
//! the registry resolves those names once, with a uniform error for
//! anything unknown.

use std::collections::HashMap;

use ys_core::{Error, Result};

use crate::selection::Selection;
use crate::variable::VariableSpec;

/// Lookup table for selections and variables.
#[derive(Debug, Default)]
pub struct Registry {
    selections: HashMap<String, Selection>,
    variables: HashMap<String, VariableSpec>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a selection under its canonical name. Registering the same
    /// name twice is an error.
    pub fn register_selection(&mut self, selection: Selection) -> Result<()> {
        let name = selection.name().to_string();
        if self.selections.contains_key(&name) {
            return Err(Error::Validation(format!("selection '{name}' already registered")));
        }
        log::debug!("registered selection '{name}'");
        self.selections.insert(name, selection);
        Ok(())
    }

    /// Register a variable under its short name. Registering the same name
    /// twice is an error.
    pub fn register_variable(&mut self, variable: VariableSpec) -> Result<()> {
        let name = variable.short_name().to_string();
        if self.variables.contains_key(&name) {
            return Err(Error::Validation(format!("variable '{name}' already registered")));
        }
        log::debug!("registered variable '{name}'");
        self.variables.insert(name, variable);
        Ok(())
    }

    /// Look up a selection by name.
    pub fn selection(&self, name: &str) -> Result<&Selection> {
        self.selections.get(name).ok_or_else(|| Error::resolution("selection", name))
    }

    /// Look up a variable by short name.
    pub fn variable(&self, name: &str) -> Result<&VariableSpec> {
        self.variables.get(name).ok_or_else(|| Error::resolution("variable", name))
    }

    /// Resolve a list of selection names and AND them together. An empty
    /// list is the always-true selection.
    pub fn selection_chain(&self, names: &[&str]) -> Result<Selection> {
        let mut chain: Option<Selection> = None;
        for name in names {
            let next = self.selection(name)?;
            chain = Some(match chain {
                Some(acc) => acc.and(next),
                None => next.clone(),
            });
        }
        Ok(chain.unwrap_or_else(Selection::all))
    }

    /// Registered selection names, sorted.
    pub fn selection_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.selections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered variable short names, sorted.
    pub fn variable_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.variables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

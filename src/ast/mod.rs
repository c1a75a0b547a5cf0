//! Boundary AST for configuration blocks.
//!
//! An external parser turns configuration text into [`Block`]s; the
//! controller only ever sees this representation. Expressions are kept
//! unevaluated so the loader can scan them for cross-node references
//! before any evaluation happens.

mod expr;
pub use expr::*;

#[cfg(test)]
mod ast_test;

use std::collections::BTreeMap;

/// A named, typed configuration unit with attributes and nested blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Period-delimited type fragments, e.g. `["remote", "http"]`.
    pub name: Vec<String>,
    /// Optional user-supplied label distinguishing instances of a type.
    pub label: Option<String>,
    pub body: Body,
}

impl Block {
    pub fn new(
        name: impl IntoIterator<Item = impl Into<String>>,
        label: Option<&str>,
        body: Body,
    ) -> Self {
        Block {
            name: name.into_iter().map(Into::into).collect(),
            label: label.map(str::to_string),
            body,
        }
    }

    /// The block's full identity fragments: type fragments plus the label,
    /// when one is present. `remote.http.example` is
    /// `["remote", "http", "example"]`.
    pub fn id_fragments(&self) -> Vec<String> {
        let mut fragments = Vec::with_capacity(self.name.len() + 1);
        fragments.extend(self.name.iter().cloned());
        if let Some(label) = &self.label {
            fragments.push(label.clone());
        }
        fragments
    }

    /// The block's type without the label, i.e. `local.file.test` has the
    /// block name `local.file`.
    pub fn block_name(&self) -> String {
        self.name.join(".")
    }
}

/// The unevaluated body of a block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    pub attributes: BTreeMap<String, Expr>,
    pub blocks: Vec<Block>,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attr(
        mut self,
        name: impl Into<String>,
        expr: Expr,
    ) -> Self {
        self.attributes.insert(name.into(), expr);
        self
    }

    pub fn with_block(
        mut self,
        block: Block,
    ) -> Self {
        self.blocks.push(block);
        self
    }

    /// Collects every reference traversal in the body, including those in
    /// nested blocks. The paths are unresolved; the loader matches them
    /// against known node IDs by longest prefix.
    pub fn references(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(
        &self,
        out: &mut Vec<Vec<String>>,
    ) {
        for expr in self.attributes.values() {
            expr.collect_references(out);
        }
        for block in &self.blocks {
            block.body.collect_references(out);
        }
    }
}

//! Message templates grouped by category.
use once_cell::sync::Lazy;
use rand::seq::IteratorRandom;
use rand::Rng;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Template, UserRow};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("templates file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("templates JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no templates for category '{0}'")]
    NoTemplates(String),
    #[error("template '{name}' not found for category '{category}'")]
    UnknownTemplate { category: String, name: String },
}

/// category -> template name -> template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateBook {
    categories: BTreeMap<String, BTreeMap<String, Template>>,
}

impl TemplateBook {
    pub fn new(categories: BTreeMap<String, BTreeMap<String, Template>>) -> Self {
        Self { categories }
    }

    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        if !path.exists() {
            return Err(TemplateError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let book = Self::from_json(&content)?;
        info!(
            path = %path.display(),
            categories = %book.categories.keys().cloned().collect::<Vec<_>>().join(", "),
            "loaded templates"
        );
        Ok(book)
    }

    pub fn from_json(content: &str) -> Result<Self, TemplateError> {
        Ok(Self::new(serde_json::from_str(content)?))
    }

    /// Templates of `category` in name order; empty when the category is unknown.
    pub fn templates_for(&self, category: &str) -> Vec<(&str, &Template)> {
        self.categories
            .get(category)
            .map(|ts| ts.iter().map(|(n, t)| (n.as_str(), t)).collect())
            .unwrap_or_default()
    }

    /// Pick the named template, or one uniformly at random when `name` is `None`.
    pub fn choose<R: Rng + ?Sized>(
        &self,
        category: &str,
        name: Option<&str>,
        rng: &mut R,
    ) -> Result<(&str, &Template), TemplateError> {
        let templates = self
            .categories
            .get(category)
            .filter(|ts| !ts.is_empty())
            .ok_or_else(|| TemplateError::NoTemplates(category.to_string()))?;

        match name {
            Some(name) => templates
                .get_key_value(name)
                .map(|(n, t)| (n.as_str(), t))
                .ok_or_else(|| TemplateError::UnknownTemplate {
                    category: category.to_string(),
                    name: name.to_string(),
                }),
            None => templates
                .iter()
                .choose(rng)
                .map(|(n, t)| (n.as_str(), t))
                .ok_or_else(|| TemplateError::NoTemplates(category.to_string())),
        }
    }
}

/// Replace each declared variable the user row has a value for.
/// Undeclared or missing variables stay as literal `{name}`.
pub fn render(template: &Template, user: &UserRow) -> String {
    let mut message = template.text.clone();
    for var in &template.variables {
        if let Some(value) = user.field(var) {
            message = message.replace(&format!("{{{}}}", var), &value);
        }
    }
    let leftover = unresolved_placeholders(&message);
    if !leftover.is_empty() {
        debug!(username = %user.username, placeholders = ?leftover, "message has unresolved placeholders");
    }
    message
}

/// Names of `{placeholder}`s still present in `text`.
pub fn unresolved_placeholders(text: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

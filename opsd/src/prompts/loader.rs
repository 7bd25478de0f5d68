//! Prompt Loader
//!
//! Loads prompt templates from files or falls back to embedded defaults.

use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;
use crate::error::{OpsError, OpsResult};

/// Loads and renders prompt templates
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    /// User override directory (e.g., `.opsd/prompts/`)
    user_dir: Option<PathBuf>,
    /// Prefix rendered prompts with their template tag
    tagged: bool,
}

impl PromptLoader {
    /// Create a loader that prefers templates found in `user_dir`
    pub fn new(user_dir: impl AsRef<Path>) -> Self {
        let user_dir = user_dir.as_ref();
        let exists = user_dir.is_dir();
        debug!(?user_dir, %exists, "PromptLoader::new: called");
        Self {
            hbs: engine(),
            user_dir: exists.then(|| user_dir.to_path_buf()),
            tagged: false,
        }
    }

    /// Create a loader that only uses embedded prompts
    pub fn embedded_only() -> Self {
        debug!("PromptLoader::embedded_only: called");
        Self {
            hbs: engine(),
            user_dir: None,
            tagged: false,
        }
    }

    /// Start every rendered prompt with a [`PromptLoader::tag`] line
    ///
    /// Scripted generators route on the tag instead of the template wording.
    pub fn tagged(mut self) -> Self {
        self.tagged = true;
        self
    }

    /// Marker line a tagged loader puts before `template_name`'s output
    pub fn tag(template_name: &str) -> String {
        format!("[prompt:{}]", template_name)
    }

    fn load_template(&self, name: &str) -> OpsResult<String> {
        debug!(%name, "PromptLoader::load_template: called");
        if let Some(ref user_dir) = self.user_dir {
            let path = user_dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::load_template: found in user override");
                return Ok(std::fs::read_to_string(&path)?);
            }
        }

        embedded::get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| OpsError::Template(format!("Prompt template not found: {}", name)))
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, template_name: &str, context: &T) -> OpsResult<String> {
        debug!(%template_name, "PromptLoader::render: called");
        let template = self.load_template(template_name)?;
        let rendered = self
            .hbs
            .render_template(&template, context)
            .map_err(|e| OpsError::Template(format!("Failed to render template {}: {}", template_name, e)))?;
        if self.tagged {
            return Ok(format!("{}\n{}", Self::tag(template_name), rendered));
        }
        Ok(rendered)
    }
}

fn engine() -> Handlebars<'static> {
    let mut hbs = Handlebars::new();
    // Prompts are plain text, not HTML
    hbs.register_escape_fn(handlebars::no_escape);
    hbs
}

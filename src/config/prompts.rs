//! Prompt templates for tubeflow.
//!
//! Prompts can be customized by placing TOML files (`summary.toml`, `blog.toml`)
//! in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub summary: SummaryPrompts,
    pub blog: BlogPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for transcript summarization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryPrompts {
    pub system: String,
    pub user: String,
}

impl Default for SummaryPrompts {
    fn default() -> Self {
        Self {
            system: "You are a helpful assistant that creates concise summaries of video transcripts. \
                     Keep the substance, drop greetings, sponsor reads and calls to subscribe."
                .to_string(),

            user: r#"Please summarize the following transcript of the video "{{title}}".

Transcript:
{{transcript}}"#
                .to_string(),
        }
    }
}

/// Prompts for LLM-written blog posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlogPrompts {
    pub system: String,
    pub user: String,
}

impl Default for BlogPrompts {
    fn default() -> Self {
        Self {
            system: "You are a professional content writer who creates engaging blog posts.".to_string(),

            user: r#"Create an engaging blog post from the following summary:

Summary: {{summary}}

Please format the blog post with:
- An engaging title (if not provided: "{{title}}")
- Introduction paragraph
- Main content sections with subheadings
- Conclusion
- Use markdown formatting

Make it informative, well-structured, and SEO-friendly."#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let summary_path = custom_path.join("summary.toml");
            if summary_path.exists() {
                let content = std::fs::read_to_string(&summary_path)?;
                prompts.summary = toml::from_str(&content)?;
            }

            let blog_path = custom_path.join("blog.toml");
            if blog_path.exists() {
                let content = std::fs::read_to_string(&blog_path)?;
                prompts.blog = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let template = "Hello {{name}}, you have {{count}} messages.";
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Alice".to_string());
        vars.insert("count".to_string(), "5".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Hello Alice, you have 5 messages.");
    }

    #[test]
    fn test_provided_vars_override_custom() {
        let mut custom = HashMap::new();
        custom.insert("title".to_string(), "from config".to_string());
        custom.insert("audience".to_string(), "engineers".to_string());
        let prompts = Prompts::load(None, Some(&custom)).unwrap();

        let mut vars = HashMap::new();
        vars.insert("title".to_string(), "Rust Ownership".to_string());

        let rendered = prompts.render_with_custom("{{title}} for {{audience}}", &vars);
        assert_eq!(rendered, "Rust Ownership for engineers");
    }

    #[test]
    fn test_custom_dir_overrides_summary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("summary.toml"),
            "system = \"Be brief.\"\nuser = \"{{transcript}}\"\n",
        )
        .unwrap();

        let prompts = Prompts::load(dir.path().to_str(), None).unwrap();
        assert_eq!(prompts.summary.system, "Be brief.");
        assert!(prompts.blog.user.contains("{{summary}}"));
    }
}

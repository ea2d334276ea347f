//! Blog stage: turn the summary into a Markdown post.

use super::{ExecutorError, StageExecutor, StageInput, StageOutput};
use crate::config::{BlogMethod, BlogSettings, Prompts};
use crate::error::{Result, TubeflowError};
use crate::openai::{complete_chat, create_client};
use crate::pipeline::Stage;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{info, instrument};

const DEFAULT_TITLE: &str = "Video Summary Blog Post";

/// File-name-safe form of a title.
pub fn slugify(title: &str) -> String {
    let slug: String = title
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c => c,
        })
        .collect();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// Render the fixed Markdown template around a summary.
pub fn render_blog_template(
    summary: &str,
    title: &str,
    video_url: Option<&str>,
    author: &str,
    date: &str,
) -> String {
    let title = if title.trim().is_empty() {
        DEFAULT_TITLE
    } else {
        title.trim()
    };
    let escaped_title = title.replace('"', "\\\"");

    let mut post = format!(
        r#"---
title: "{escaped_title}"
date: {date}
tags: [video-summary, content]
author: {author}
---

# {title}

*Published: {date}*

## Overview

This blog post is generated from a video summary, providing key insights and information in an easily digestible format.

## Summary

{summary}

## Key Points

- Main topics covered in the video
- Important insights and takeaways
- Actionable information for readers

## Conclusion

This summary provides a comprehensive overview of the video content, making it accessible for those who prefer reading over watching.

---

*This content was automatically generated from video transcription and summarization.*
"#
    );

    if let Some(url) = video_url.filter(|u| !u.is_empty()) {
        post.push_str(&format!("\n\n**Original Video:** [{url}]({url})"));
    }

    post
}

pub struct BlogExecutor {
    client: Option<async_openai::Client<async_openai::config::OpenAIConfig>>,
    settings: BlogSettings,
    prompts: Prompts,
}

impl BlogExecutor {
    pub fn new(settings: BlogSettings, prompts: Prompts) -> Result<Self> {
        let client = match settings.method {
            BlogMethod::OpenAI => Some(create_client()?),
            BlogMethod::Template => None,
        };
        Ok(Self {
            client,
            settings,
            prompts,
        })
    }

    #[instrument(skip(self, input), fields(job_id = %input.job_id, method = %self.settings.method))]
    async fn run(&self, input: &StageInput) -> Result<StageOutput> {
        let summary = input
            .require(Stage::Summarize)?
            .as_text()
            .ok_or_else(|| TubeflowError::InvalidInput("summary is not text".to_string()))?;
        let title = input.title();

        let post = match (&self.settings.method, &self.client) {
            (BlogMethod::OpenAI, Some(client)) => {
                let mut vars = HashMap::new();
                vars.insert("summary".to_string(), summary.to_string());
                vars.insert("title".to_string(), title.clone());
                let user_prompt = self.prompts.render_with_custom(&self.prompts.blog.user, &vars);

                complete_chat(
                    client,
                    &self.settings.model,
                    &self.prompts.blog.system,
                    user_prompt,
                    self.settings.max_tokens,
                )
                .await?
            }
            _ => {
                let date = chrono::Local::now().format("%Y-%m-%d").to_string();
                render_blog_template(
                    summary,
                    &title,
                    input.metadata("video_url"),
                    &self.settings.author,
                    &date,
                )
            }
        };

        tokio::fs::create_dir_all(&input.work_dir).await?;
        let slug = slugify(&title);
        let blog_path = input.work_dir.join(format!("{}_blog.md", slug));
        tokio::fs::write(&blog_path, &post).await?;

        info!("Blog post written to {}", blog_path.display());

        Ok(StageOutput::file(blog_path)
            .with_meta("slug", slug)
            .with_meta("method", self.settings.method.to_string()))
    }
}

#[async_trait]
impl StageExecutor for BlogExecutor {
    fn stage(&self) -> Stage {
        Stage::BlogRender
    }

    async fn execute(&self, input: &StageInput) -> std::result::Result<StageOutput, ExecutorError> {
        self.run(input).await.map_err(Into::into)
    }
}

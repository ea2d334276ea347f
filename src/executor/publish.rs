//! Publish stage: copy the blog post and episode into the site directory and
//! update its JSON index.

use super::{ExecutorError, StageExecutor, StageInput, StageOutput};
use crate::config::PublishSettings;
use crate::error::{Result, TubeflowError};
use crate::pipeline::{JobId, Stage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

const INDEX_FILE: &str = "index.json";

/// One published post/episode pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub slug: String,
    pub title: String,
    pub job_id: JobId,
    pub video_url: Option<String>,
    /// Paths relative to the site directory.
    pub blog_path: String,
    pub audio_path: String,
    pub blog_url: Option<String>,
    pub audio_url: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Contents of `index.json`, newest entry first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteIndex {
    pub title: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub entries: Vec<FeedEntry>,
}

impl SiteIndex {
    /// Load the index, or an empty one if the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Insert or replace the entry with the same slug, keeping newest first.
    pub fn upsert(&mut self, entry: FeedEntry) {
        self.entries.retain(|e| e.slug != entry.slug);
        self.updated_at = Some(entry.published_at);
        self.entries.push(entry);
        self.entries
            .sort_by(|a, b| b.published_at.cmp(&a.published_at));
    }

    /// Write the index through a temporary file so readers never see a partial file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| TubeflowError::InvalidInput(format!("bad index path {}", path.display())))?;
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(self)?)?;
        tmp.persist(path).map_err(|e| TubeflowError::Io(e.error))?;
        Ok(())
    }
}

pub struct PublishExecutor {
    site_dir: PathBuf,
    settings: PublishSettings,
}

impl PublishExecutor {
    pub fn new(site_dir: PathBuf, settings: PublishSettings) -> Self {
        Self { site_dir, settings }
    }

    #[instrument(skip(self, input), fields(job_id = %input.job_id, site_dir = %self.site_dir.display()))]
    async fn run(&self, input: &StageInput) -> Result<StageOutput> {
        let blog_src = upstream_file(input, Stage::BlogRender)?;
        let audio_src = upstream_file(input, Stage::PodcastSynthesize)?;

        let title = input.title();
        let slug = input
            .upstream
            .get(&Stage::BlogRender)
            .and_then(|o| o.meta("slug"))
            .map(str::to_string)
            .unwrap_or_else(|| super::slugify(&title));

        let entry_dir = self.site_dir.join(&slug);
        tokio::fs::create_dir_all(&entry_dir).await?;

        let blog_name = file_name(&blog_src)?;
        let audio_name = file_name(&audio_src)?;
        tokio::fs::copy(&blog_src, entry_dir.join(&blog_name)).await?;
        tokio::fs::copy(&audio_src, entry_dir.join(&audio_name)).await?;

        let blog_path = format!("{}/{}", slug, blog_name);
        let audio_path = format!("{}/{}", slug, audio_name);
        let base_url = self
            .settings
            .base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string());

        let entry = FeedEntry {
            slug: slug.clone(),
            title,
            job_id: input.job_id,
            video_url: input.metadata("video_url").map(str::to_string),
            blog_url: base_url.as_ref().map(|b| format!("{}/{}", b, blog_path)),
            audio_url: base_url.as_ref().map(|b| format!("{}/{}", b, audio_path)),
            blog_path,
            audio_path,
            published_at: Utc::now(),
        };

        let index_path = self.site_dir.join(INDEX_FILE);
        let site_title = self.settings.site_title.clone();
        let count = {
            let index_path = index_path.clone();
            tokio::task::spawn_blocking(move || -> Result<usize> {
                let mut index = SiteIndex::load(&index_path)?;
                index.title = site_title;
                index.upsert(entry);
                index.save(&index_path)?;
                Ok(index.entries.len())
            })
            .await
            .map_err(|e| TubeflowError::Executor(format!("index update panicked: {}", e)))??
        };

        info!("Published {} ({} entries in index)", slug, count);

        Ok(StageOutput::file(entry_dir)
            .with_meta("slug", slug)
            .with_meta("index_path", index_path.display().to_string()))
    }
}

fn upstream_file(input: &StageInput, stage: Stage) -> Result<PathBuf> {
    input
        .require(stage)?
        .path()
        .map(Path::to_path_buf)
        .ok_or_else(|| TubeflowError::InvalidInput(format!("{} produced no file", stage)))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| TubeflowError::InvalidInput(format!("no file name in {}", path.display())))
}

#[async_trait]
impl StageExecutor for PublishExecutor {
    fn stage(&self) -> Stage {
        Stage::Publish
    }

    async fn execute(&self, input: &StageInput) -> std::result::Result<StageOutput, ExecutorError> {
        self.run(input).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry(slug: &str, minutes_ago: i64) -> FeedEntry {
        FeedEntry {
            slug: slug.to_string(),
            title: slug.to_string(),
            job_id: uuid::Uuid::new_v4(),
            video_url: None,
            blog_path: format!("{}/{}_blog.md", slug, slug),
            audio_path: format!("{}/{}_podcast.mp3", slug, slug),
            blog_url: None,
            audio_url: None,
            published_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_upsert_replaces_and_orders() {
        let mut index = SiteIndex::default();
        index.upsert(entry("old", 30));
        index.upsert(entry("new", 1));
        index.upsert(entry("old", 0));

        let slugs: Vec<_> = index.entries.iter().map(|e| e.slug.as_str()).collect();
        assert_eq!(slugs, vec!["old", "new"]);
    }

    #[test]
    fn test_index_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site").join(INDEX_FILE);
        assert!(SiteIndex::load(&path).unwrap().entries.is_empty());

        let mut index = SiteIndex {
            title: "Notes".to_string(),
            ..Default::default()
        };
        index.upsert(entry("a", 0));
        index.save(&path).unwrap();

        assert_eq!(SiteIndex::load(&path).unwrap(), index);
    }

    #[tokio::test]
    async fn test_publish_copies_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let blog = work.join("rust_talk_blog.md");
        let audio = work.join("rust_talk_podcast.mp3");
        std::fs::write(&blog, "# Rust talk").unwrap();
        std::fs::write(&audio, b"ID3").unwrap();

        let mut upstream = BTreeMap::new();
        upstream.insert(
            Stage::Download,
            StageOutput::file(work.join("x.mp3"))
                .with_meta("title", "Rust Talk")
                .with_meta("video_url", "https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
        );
        upstream.insert(Stage::BlogRender, StageOutput::file(&blog).with_meta("slug", "rust_talk"));
        upstream.insert(Stage::PodcastSynthesize, StageOutput::file(&audio));

        let input = StageInput {
            job_id: uuid::Uuid::new_v4(),
            source: "dQw4w9WgXcQ".to_string(),
            stage: Stage::Publish,
            attempt: 1,
            work_dir: work.clone(),
            upstream,
        };

        let site = dir.path().join("site");
        let settings = PublishSettings {
            base_url: Some("https://notes.example.com/".to_string()),
            ..Default::default()
        };
        let executor = PublishExecutor::new(site.clone(), settings);
        let output = executor.execute(&input).await.unwrap();

        assert_eq!(output.path(), Some(site.join("rust_talk").as_path()));
        assert!(site.join("rust_talk").join("rust_talk_blog.md").exists());
        assert!(site.join("rust_talk").join("rust_talk_podcast.mp3").exists());

        let index = SiteIndex::load(&site.join(INDEX_FILE)).unwrap();
        assert_eq!(index.title, "Video Notes");
        assert_eq!(index.entries.len(), 1);
        assert_eq!(
            index.entries[0].blog_url.as_deref(),
            Some("https://notes.example.com/rust_talk/rust_talk_blog.md")
        );
        assert_eq!(
            index.entries[0].video_url.as_deref(),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
    }

    #[tokio::test]
    async fn test_publish_requires_both_branches() {
        let dir = tempfile::tempdir().unwrap();
        let mut upstream = BTreeMap::new();
        upstream.insert(Stage::BlogRender, StageOutput::file(dir.path().join("a_blog.md")));

        let input = StageInput {
            job_id: uuid::Uuid::new_v4(),
            source: "dQw4w9WgXcQ".to_string(),
            stage: Stage::Publish,
            attempt: 1,
            work_dir: dir.path().to_path_buf(),
            upstream,
        };

        let executor = PublishExecutor::new(dir.path().join("site"), PublishSettings::default());
        let err = executor.execute(&input).await.unwrap_err();
        assert_eq!(err.code, "invalid_input");
    }
}

//! Markdown to DOCX through an external renderer.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{
    config::Md2DocxConfig,
    error::{Result, StudydocError},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub add_table_of_contents: bool,
    pub add_page_numbers: bool,
    pub template: Option<PathBuf>,
}

impl From<&Md2DocxConfig> for RenderOptions {
    fn from(config: &Md2DocxConfig) -> Self {
        Self {
            add_table_of_contents: config.add_table_of_contents,
            add_page_numbers: config.add_page_numbers,
            template: config.template().map(Path::to_path_buf),
        }
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, markdown: &str, options: &RenderOptions) -> Result<Vec<u8>>;
}

/// Render `markdown` with `renderer`. Failures are final: rendering is deterministic.
pub async fn to_rendered_document(
    renderer: &dyn Renderer,
    markdown: &str,
    options: &RenderOptions,
) -> Result<Vec<u8>> {
    let bytes = renderer.render(markdown, options).await?;
    if bytes.is_empty() {
        return Err(StudydocError::Render {
            reason: "renderer produced no output".to_string(),
        });
    }
    Ok(bytes)
}

pub struct PandocRenderer {
    pandoc_path: PathBuf,
    timeout: Duration,
}

impl PandocRenderer {
    pub fn new(config: &Md2DocxConfig) -> Self {
        Self {
            pandoc_path: config.pandoc_path.clone(),
            timeout: config.timeout(),
        }
    }

    /// Command line arguments for one render.
    pub fn args(options: &RenderOptions) -> Vec<String> {
        let mut args = vec![
            "--from".to_string(),
            "markdown".to_string(),
            "--to".to_string(),
            "docx".to_string(),
            "--output".to_string(),
            "-".to_string(),
        ];
        if options.add_table_of_contents {
            args.push("--toc".to_string());
            args.push("--toc-depth=3".to_string());
        }
        if options.add_page_numbers {
            args.push("--number-sections".to_string());
        }
        if let Some(template) = &options.template {
            args.push(format!("--reference-doc={}", template.display()));
        }
        args
    }
}

#[async_trait]
impl Renderer for PandocRenderer {
    async fn render(&self, markdown: &str, options: &RenderOptions) -> Result<Vec<u8>> {
        let failed = |reason: String| StudydocError::Render { reason };

        let mut child = Command::new(&self.pandoc_path)
            .args(Self::args(options))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("could not start {}: {}", self.pandoc_path.display(), e)))?;

        // Dropping the child on timeout kills pandoc
        let run = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(markdown.as_bytes())
                    .await
                    .map_err(|e| failed(format!("could not feed pandoc: {e}")))?;
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| failed(e.to_string()))
        };
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| failed(format!("pandoc gave no result within {}s", self.timeout.as_secs())))??;
        if !output.status.success() {
            return Err(failed(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(output.stdout)
    }
}

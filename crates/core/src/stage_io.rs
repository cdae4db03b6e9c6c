//! Where artifacts live and whether a stage still has work to do.
//!
//! A stage counts as complete for a unit when its output artifact exists and
//! is non-empty. Content is never inspected.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tokio::fs;
use uuid::Uuid;

use crate::{
    error::{Result, StudydocError},
    types::{ArtifactKind, Step, StepSelection},
};

/// One video or document tracked through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// File stem shared by every artifact of the unit.
    pub id: String,
    pub source: PathBuf,
    pub source_kind: ArtifactKind,
    /// Directory of `source` relative to the input root, mirrored under the output root.
    pub rel_dir: PathBuf,
}

impl Unit {
    /// A unit for `path`, or `None` when the file is not a pipeline artifact.
    pub fn from_path(path: &Path, rel_dir: impl Into<PathBuf>) -> Option<Self> {
        let kind = ArtifactKind::from_extension(path.extension()?.to_str()?)?;
        let id = path.file_stem()?.to_str()?.to_string();
        Some(Self {
            id,
            source: path.to_path_buf(),
            source_kind: kind,
            rel_dir: rel_dir.into(),
        })
    }

    /// Steps of `selection` that produce something this unit does not start with.
    pub fn applicable_steps(&self, selection: &StepSelection) -> Vec<Step> {
        selection
            .steps()
            .into_iter()
            .filter(|step| step.output() > self.source_kind)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStatus {
    pub exists: bool,
    pub path: PathBuf,
}

fn is_present(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default)]
pub struct StageIo {
    output_root: Option<PathBuf>,
    force: bool,
}

impl StageIo {
    /// `output_root = None` puts artifacts next to their source.
    pub fn new(output_root: Option<PathBuf>, force: bool) -> Self {
        Self { output_root, force }
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub fn artifact_path(&self, unit: &Unit, kind: ArtifactKind) -> PathBuf {
        if kind == unit.source_kind {
            return unit.source.clone();
        }
        let dir = match &self.output_root {
            Some(root) => root.join(&unit.rel_dir),
            None => unit
                .source
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        dir.join(format!("{}.{}", unit.id, kind.extension()))
    }

    pub fn resolve_stage(&self, unit: &Unit, kind: ArtifactKind) -> StageStatus {
        let path = self.artifact_path(unit, kind);
        StageStatus {
            exists: is_present(&path),
            path,
        }
    }

    /// True when `step` was requested and its output is missing, or when
    /// recomputation is forced.
    pub fn should_run(&self, unit: &Unit, step: Step, selection: &StepSelection) -> bool {
        selection.includes(step) && (self.force || !self.resolve_stage(unit, step.output()).exists)
    }

    /// Path of an artifact a stage needs as input, failing when it is absent.
    pub fn require(&self, unit: &Unit, kind: ArtifactKind) -> Result<PathBuf> {
        let status = self.resolve_stage(unit, kind);
        if status.exists {
            Ok(status.path)
        } else {
            Err(StudydocError::MissingInput { path: status.path })
        }
    }
}

pub async fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map_err(|e| StudydocError::io(path, e))
}

/// Write `contents` to a temporary sibling and rename it over `path`, so
/// readers only ever see a complete artifact.
pub async fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| StudydocError::io(&dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    if let Err(e) = fs::write(&tmp, contents.as_ref()).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StudydocError::io(&tmp, e));
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StudydocError::io(path, e));
    }
    Ok(())
}

/// Whether a file of `kind` can start a unit for the requested steps.
fn is_unit_source(kind: ArtifactKind, selection: &StepSelection) -> bool {
    let Some(last) = selection.steps().last().copied() else {
        return false;
    };
    kind != ArtifactKind::Document && kind < last.output()
}

fn walk(dir: &Path, rel: &Path, skip: Option<&Path>, found: &mut Vec<Unit>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| StudydocError::io(dir, e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            let canonical = path.canonicalize().ok();
            if skip.is_some() && canonical.as_deref() == skip {
                continue;
            }
            walk(&path, &rel.join(&name), skip, found)?;
        } else if let Some(unit) = Unit::from_path(&path, rel) {
            found.push(unit);
        }
    }
    Ok(())
}

/// A non-empty subtitle beside a video unit, sharing its stem.
fn sibling_subtitle(video: &Unit) -> Option<Unit> {
    if video.source_kind != ArtifactKind::Video {
        return None;
    }
    let dir = match video.source.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|entry| Unit::from_path(&entry.path(), video.rel_dir.clone()))
        .find(|unit| {
            unit.source_kind == ArtifactKind::Subtitle
                && unit.id == video.id
                && is_present(&unit.source)
        })
}

/// Units under `input`, sorted by directory then id.
///
/// A directory is walked recursively, skipping hidden entries and the output
/// root. Files sharing a directory and stem form one unit, started from the
/// earliest artifact; a video only counts when no subtitle or later artifact
/// sits beside it. A single video file given directly follows the same rule.
pub fn discover_units(
    input: &Path,
    selection: &StepSelection,
    output_root: Option<&Path>,
) -> Result<Vec<Unit>> {
    let meta = std::fs::metadata(input).map_err(|_| StudydocError::MissingInput {
        path: input.to_path_buf(),
    })?;

    if meta.is_file() {
        let unit = Unit::from_path(input, PathBuf::new())
            .filter(|u| u.source_kind != ArtifactKind::Document)
            .ok_or_else(|| StudydocError::UnsupportedInput {
                path: input.to_path_buf(),
            })?;
        return Ok(vec![sibling_subtitle(&unit).unwrap_or(unit)]);
    }

    let skip = output_root.and_then(|root| root.canonicalize().ok());
    let mut found = Vec::new();
    walk(input, Path::new(""), skip.as_deref(), &mut found)?;

    let mut by_key: BTreeMap<(PathBuf, String), Unit> = BTreeMap::new();
    for unit in found
        .into_iter()
        .filter(|u| is_unit_source(u.source_kind, selection))
    {
        let key = (unit.rel_dir.clone(), unit.id.clone());
        let rank = |u: &Unit| (u.source_kind == ArtifactKind::Video, u.source_kind);
        let replace = by_key
            .get(&key)
            .is_none_or(|existing| rank(&unit) < rank(existing));
        if replace {
            by_key.insert(key, unit);
        }
    }
    Ok(by_key.into_values().collect())
}

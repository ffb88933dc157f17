//! State document and show file persistence

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::Registry;
use crate::model::{AppState, HISTORY_LIMIT, TemplateKind};

pub const SHOW_FILE_VERSION: &str = "1.0";

/// Exported show: the whole aggregate plus a version tag.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowFile {
    pub version: String,
    pub export_date: String,
    pub data: AppState,
}

/// Load the state document, falling back to defaults when it is missing or unreadable.
///
/// Returns the state and whether it was migrated (and should be written back).
pub async fn load(path: &Path) -> (AppState, bool) {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("State file not found at {:?}, starting with an empty show", path);
            let mut state = AppState::default();
            state.hub.ensure_node_id();
            return (state, true);
        }
        Err(e) => {
            tracing::error!("Failed to read state file {:?}: {}", path, e);
            return (AppState::default(), false);
        }
    };

    match parse_state(&contents) {
        Ok((state, migrated)) => {
            tracing::info!(
                recorders = state.recorders.len(),
                migrated = migrated,
                "Loaded state from {:?}",
                path
            );
            (state, migrated)
        }
        Err(e) => {
            tracing::error!("Failed to parse state file {:?}: {:#}", path, e);
            (AppState::default(), false)
        }
    }
}

pub fn parse_state(contents: &str) -> Result<(AppState, bool)> {
    let mut state: AppState =
        serde_json::from_str(contents).context("State document is not valid")?;
    let migrated = migrate(&mut state);
    Ok((state, migrated))
}

/// Bring a legacy document up to the current shape. Returns true when anything changed.
pub fn migrate(state: &mut AppState) -> bool {
    let mut changed = false;

    for template in &mut state.templates {
        match TemplateKind::from_id(&template.id) {
            Some(TemplateKind::Show)
                if template.name == "Broadcast" || template.name == "Date" =>
            {
                *template = TemplateKind::Show.template();
                changed = true;
            }
            Some(TemplateKind::Take)
                if template.format.contains("Scene") || template.name == "Show_S#_T#" =>
            {
                *template = TemplateKind::Take.template();
                changed = true;
            }
            _ => {}
        }
    }
    for kind in TemplateKind::ALL {
        if !state.templates.iter().any(|t| t.id == kind.id()) {
            state.templates.push(kind.template());
            changed = true;
        }
    }

    let mut seen = std::collections::HashSet::new();
    let before = state.recorders.len();
    state.recorders.retain(|r| seen.insert(r.id.clone()));
    if state.recorders.len() != before {
        tracing::warn!(
            dropped = before - state.recorders.len(),
            "Dropped recorders with duplicate ids"
        );
        changed = true;
    }

    for recorder in &mut state.recorders {
        if recorder.shot_number == 0 {
            recorder.shot_number = 1;
            changed = true;
        }
        if recorder.take_number == 0 {
            recorder.take_number = 1;
            changed = true;
        }
    }

    if state.take_history.len() > HISTORY_LIMIT {
        state.take_history.truncate(HISTORY_LIMIT);
        changed = true;
    }

    if state.hub.ensure_node_id() {
        changed = true;
    }

    changed
}

/// Write the state document atomically (temp file in the same directory, then rename)
pub async fn save(path: &Path, state: &AppState) -> Result<()> {
    let contents = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
    write_atomic(path.to_path_buf(), contents).await
}

async fn write_atomic(path: PathBuf, contents: String) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory: {:?}", dir))?;

        let mut file = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
        file.write_all(contents.as_bytes())
            .context("Failed to write temp file")?;
        file.persist(&path)
            .with_context(|| format!("Failed to replace {:?}", path))?;
        Ok(())
    })
    .await
    .context("Persist task panicked")?
}

/// Write the show to `path` as a versioned show file
pub async fn export_show(path: &Path, state: &AppState) -> Result<()> {
    let file = ShowFile {
        version: SHOW_FILE_VERSION.to_string(),
        export_date: chrono::Utc::now().to_rfc3339(),
        data: state.clone(),
    };
    let contents = serde_json::to_string_pretty(&file).context("Failed to serialize show")?;
    write_atomic(path.to_path_buf(), contents).await?;
    tracing::info!("Exported show to {:?}", path);
    Ok(())
}

/// Read a show file, ready to replace the current aggregate
pub async fn import_show(path: &Path) -> Result<AppState> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read show file: {:?}", path))?;
    let state = parse_show(&contents)?;
    tracing::info!(
        recorders = state.recorders.len(),
        "Imported show from {:?}",
        path
    );
    Ok(state)
}

pub fn parse_show(contents: &str) -> Result<AppState> {
    let document: serde_json::Value =
        serde_json::from_str(contents).context("Show file is not valid JSON")?;

    if document.get("version").is_none() {
        bail!("Invalid show file: missing version");
    }
    let Some(data) = document.get("data") else {
        bail!("Invalid show file: missing data");
    };
    if !data.get("recorders").is_some_and(|v| v.is_array()) {
        bail!("Invalid show file: missing recorders");
    }
    if !data.get("templates").is_some_and(|v| v.is_array()) {
        bail!("Invalid show file: missing templates");
    }

    let mut state: AppState =
        serde_json::from_value(data.clone()).context("Show file data is not valid")?;
    migrate(&mut state);
    for recorder in &mut state.recorders {
        recorder.online = false;
        recorder.last_checked = None;
        recorder.transport_status = None;
        recorder.timecode = None;
    }
    Ok(state)
}

/// Write the aggregate after every user mutation until aborted
pub fn spawn_persister(registry: Arc<Registry>, path: PathBuf) -> JoinHandle<()> {
    let mut revisions = registry.subscribe_revisions();
    tokio::spawn(async move {
        while revisions.changed().await.is_ok() {
            let state = registry.snapshot().await;
            if let Err(e) = save(&path, &state).await {
                tracing::error!("Failed to save state: {:#}", e);
            } else {
                tracing::debug!("Saved state to {:?}", path);
            }
        }
    })
}

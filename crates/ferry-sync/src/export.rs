//! Project export to flat `.ispac` files.

use std::path::{Path, PathBuf};

use ferry_catalog::{CatalogGateway, CatalogReader};
use serde::Serialize;
use tracing::info;

use crate::error::{Result, SyncError};

/// One written project file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedProject {
    pub project: String,
    pub path: PathBuf,
    pub bytes: usize,
}

/// File name for a project, with path separators and reserved characters replaced.
pub fn file_name(project: &str) -> String {
    let stem: String = project
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("{}.ispac", stem)
}

/// Write every project of `folder` (or only `project`) into `out_dir`.
pub async fn export_projects(
    gateway: &dyn CatalogGateway,
    folder: &str,
    project: Option<&str>,
    out_dir: &Path,
) -> Result<Vec<ExportedProject>> {
    let reader = CatalogReader::new(gateway);
    if !reader.folder_exists(folder).await? {
        return Err(SyncError::FolderMissing {
            server: gateway.endpoint().server.clone(),
            folder: folder.to_string(),
        });
    }

    let mut projects: Vec<String> = reader
        .projects(folder)
        .await?
        .into_iter()
        .map(|p| p.name)
        .collect();
    if let Some(wanted) = project {
        if !projects.iter().any(|p| p == wanted) {
            return Err(SyncError::ProjectMissing {
                server: gateway.endpoint().server.clone(),
                folder: folder.to_string(),
                project: wanted.to_string(),
            });
        }
        projects.retain(|p| p == wanted);
    }

    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|source| SyncError::Io {
            path: out_dir.to_path_buf(),
            source,
        })?;

    let mut exported = Vec::with_capacity(projects.len());
    for name in projects {
        let stream = reader.project_stream(folder, &name).await?;
        let path = out_dir.join(file_name(&name));
        tokio::fs::write(&path, &stream)
            .await
            .map_err(|source| SyncError::Io {
                path: path.clone(),
                source,
            })?;
        info!(project = %name, path = %path.display(), bytes = stream.len(), "exported project");
        exported.push(ExportedProject {
            project: name,
            path,
            bytes: stream.len(),
        });
    }
    Ok(exported)
}

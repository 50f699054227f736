//! File mirror: accepts uploads classified by main/sub folder and serves
//! the resulting tree read-only on a dedicated port.

use axum::Router;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::error::Result;

/// Closed set of accepted upload extensions
pub const VALID_EXTS: &[&str] = &["html", "txt", "log", "csv", "json", "png", "jpg"];
/// Root of the mirrored upload tree
pub const FILE_ROOT: &str = "./file_service";

pub fn extension(name: &str) -> Option<&str> {
    let mut parts = name.rsplitn(2, '.');
    let ext = parts.next()?;
    parts.next()?;
    Some(ext)
}

pub fn is_valid_ext(name: &str) -> bool {
    extension(name)
        .map(|ext| VALID_EXTS.contains(&ext))
        .unwrap_or(false)
}

fn safe_component(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != ".."
}

pub struct FileService {
    root: PathBuf,
}

impl FileService {
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self { root: root.into() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_path(&self, main: &str, sub: &str, name: &str) -> Option<PathBuf> {
        if !safe_component(main) || !safe_component(name) {
            return None;
        }
        if sub.is_empty() {
            Some(self.root.join(main).join(name))
        } else if safe_component(sub) {
            Some(self.root.join(main).join(sub).join(name))
        } else {
            None
        }
    }

    /// POST /files/upload — replace-then-create semantics
    pub async fn save_upload(
        &self,
        main: &str,
        sub: &str,
        filename: &str,
        bytes: &[u8],
    ) -> String {
        if main.is_empty() {
            return "main_folder is missing".to_string();
        }
        if extension(filename).is_none() {
            return "file extension name is missing".to_string();
        }
        if !is_valid_ext(filename) {
            return format!(
                "unsupported file ext : .{}",
                extension(filename).unwrap_or("")
            );
        }
        let Some(path) = self.target_path(main, sub, filename) else {
            return "invalid path".to_string();
        };
        info!("receiving file {} to folder {}/{}", filename, main, sub);

        if let Some(parent) = path.parent() {
            if tokio::fs::create_dir_all(parent).await.is_err() {
                return "make sure dir failed".to_string();
            }
        }
        if tokio::fs::try_exists(&path).await.unwrap_or(false)
            && tokio::fs::remove_file(&path).await.is_err()
        {
            return "del old file failed".to_string();
        }
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                error!("write {} failed: {}", path.display(), e);
                "create new file failed".to_string()
            }
        }
    }

    /// DELETE /files/delete
    pub async fn delete(&self, main: &str, sub: &str, filename: &str) -> String {
        if filename.is_empty() {
            return "missing file_name".to_string();
        }
        if main.is_empty() {
            return "missing main_folder".to_string();
        }
        let Some(path) = self.target_path(main, sub, filename) else {
            return "invalid path".to_string();
        };
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => "ok".to_string(),
                Err(e) => format!("error:{}", e),
            }
        } else {
            "ok".to_string()
        }
    }
}

/// Serve a directory read-only; used for both the upload tree and the
/// notify record mirror.
pub async fn serve_static(root: PathBuf, port: u16) -> Result<()> {
    let app = Router::new().fallback_service(ServeDir::new(root.clone()));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("static mirror of {} at port {}", root.display(), port);
    axum::serve(listener, app).await?;
    Ok(())
}

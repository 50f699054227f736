//! Directory-sync uploader: mirrors one flat local directory into the hub's
//! file service. Modification times are tracked in a `file_stat.json`
//! sidecar so only changed files are pushed; files removed locally are
//! deleted remotely.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::UploaderConfig;
use crate::error::{HubError, Result};
use crate::files::service::is_valid_ext;

const STAT_FILE: &str = "file_stat.json";

pub struct Uploader {
    url_upload: String,
    url_delete: String,
    root: PathBuf,
    main_folder: String,
    sub_folder: String,
    stat_path: PathBuf,
    // file name -> mtime millis
    mod_times: Mutex<HashMap<String, i64>>,
    client: Client,
    interval: Duration,
}

impl Uploader {
    pub fn new(cfg: &UploaderConfig) -> Result<Arc<Self>> {
        if cfg.main_folder.is_empty() {
            return Err(HubError::MissingConfig("uploader.main_folder".to_string()));
        }
        let root = PathBuf::from(&cfg.root);
        let stat_path = root.join(STAT_FILE);
        let mod_times = match std::fs::read_to_string(&stat_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        let base = cfg.url.trim_end_matches('/');
        Ok(Arc::new(Self {
            url_upload: format!("{}/files/upload", base),
            url_delete: format!("{}/files/delete", base),
            root,
            main_folder: cfg.main_folder.clone(),
            sub_folder: cfg.sub_folder.clone(),
            stat_path,
            mod_times: Mutex::new(mod_times),
            client: Client::new(),
            interval: Duration::from_secs(cfg.scan_interval_secs.max(1)),
        }))
    }

    pub fn spawn(self: &Arc<Self>) {
        let uploader = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(uploader.interval);
            loop {
                uploader.scan().await;
                ticker.tick().await;
            }
        });
        info!("uploader watching {}", self.root.display());
    }

    pub(crate) async fn scan(&self) {
        let mut dirty = false;
        let mut present: Vec<String> = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("scan {} failed: {}", self.root.display(), e);
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_dir() {
                continue; // subdirectories are not mirrored
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == STAT_FILE || !is_valid_ext(&name) {
                continue;
            }
            present.push(name.clone());

            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);

            let needs_upload = {
                let mut mod_times = self.mod_times.lock().await;
                match mod_times.get(&name) {
                    Some(last) if *last >= mtime => false,
                    _ => {
                        mod_times.insert(name.clone(), mtime);
                        dirty = true;
                        true
                    }
                }
            };
            if needs_upload {
                self.upload(&name, entry.path()).await;
            }
        }

        // anything tracked but no longer on disk is removed remotely
        let vanished: Vec<String> = {
            let mod_times = self.mod_times.lock().await;
            mod_times
                .keys()
                .filter(|name| !present.contains(name))
                .cloned()
                .collect()
        };
        for name in vanished {
            self.delete(&name).await;
            self.mod_times.lock().await.remove(&name);
            dirty = true;
        }

        if dirty {
            self.save_stats().await;
        }
    }

    async fn save_stats(&self) {
        let raw = {
            let mod_times = self.mod_times.lock().await;
            serde_json::to_vec_pretty(&*mod_times).unwrap_or_default()
        };
        if let Err(e) = tokio::fs::write(&self.stat_path, raw).await {
            error!("save {} failed: {}", self.stat_path.display(), e);
        }
    }

    async fn upload(&self, name: &str, path: PathBuf) {
        info!("uploading: {}", name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("read {} failed: {}", path.display(), e);
                return;
            }
        };
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(name.to_string()))
            .text("main_folder", self.main_folder.clone())
            .text("sub_folder", self.sub_folder.clone());
        match self.client.post(&self.url_upload).multipart(form).send().await {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                info!("upload result: statusCode={}, result={}", status, body);
            }
            Err(e) => error!("upload {} failed: {}", name, e),
        }
    }

    async fn delete(&self, name: &str) {
        info!("deleting: {}", name);
        let res = self
            .client
            .delete(&self.url_delete)
            .query(&[
                ("file_name", name),
                ("main_folder", self.main_folder.as_str()),
                ("sub_folder", self.sub_folder.as_str()),
            ])
            .send()
            .await;
        match res {
            Ok(resp) => {
                let body = resp.text().await.unwrap_or_default();
                info!("delete {} result={}", name, body);
            }
            Err(e) => error!("delete {} failed: {}", name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &PathBuf) -> UploaderConfig {
        UploaderConfig {
            url: "http://127.0.0.1:1".to_string(),
            root: root.to_string_lossy().to_string(),
            main_folder: "strat1".to_string(),
            sub_folder: String::new(),
            scan_interval_secs: 1,
        }
    }

    #[test]
    fn test_main_folder_required() {
        let root = std::env::temp_dir();
        let mut cfg = config(&root);
        cfg.main_folder = String::new();
        assert!(Uploader::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_scan_tracks_mtimes_and_removals() {
        let root = std::env::temp_dir().join(format!("quanthub-up-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(root.join("a.txt"), b"one").await.unwrap();
        tokio::fs::write(root.join("skip.exe"), b"bin").await.unwrap();

        let uploader = Uploader::new(&config(&root)).unwrap();
        uploader.scan().await;
        {
            let mod_times = uploader.mod_times.lock().await;
            assert!(mod_times.contains_key("a.txt"));
            // invalid extensions are never tracked
            assert!(!mod_times.contains_key("skip.exe"));
            assert!(!mod_times.contains_key(STAT_FILE));
        }
        // the sidecar was written
        let raw = tokio::fs::read_to_string(root.join(STAT_FILE)).await.unwrap();
        let stats: HashMap<String, i64> = serde_json::from_str(&raw).unwrap();
        assert!(stats.contains_key("a.txt"));

        // deleting the file drops it from tracking on the next scan
        tokio::fs::remove_file(root.join("a.txt")).await.unwrap();
        uploader.scan().await;
        assert!(!uploader.mod_times.lock().await.contains_key("a.txt"));
        tokio::fs::remove_dir_all(&root).await.ok();
    }

    #[tokio::test]
    async fn test_stats_reloaded_on_restart() {
        let root = std::env::temp_dir().join(format!("quanthub-up-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(root.join("a.log"), b"one").await.unwrap();

        let uploader = Uploader::new(&config(&root)).unwrap();
        uploader.scan().await;
        let before = *uploader.mod_times.lock().await.get("a.log").unwrap();

        let reloaded = Uploader::new(&config(&root)).unwrap();
        assert_eq!(*reloaded.mod_times.lock().await.get("a.log").unwrap(), before);
        tokio::fs::remove_dir_all(&root).await.ok();
    }
}

use std::path::Path;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use tracing::{info, warn};

use crate::checkpoint::CheckpointMeta;
use crate::config::Settings;
use crate::error::DownloadError;
use crate::plant::Plant;

async fn download_file(url: &str, path: &Path, token: Option<&str>) -> Result<(), DownloadError> {
    info!("Downloading {:?} from {}", path, url);

    let mut header_map = HeaderMap::new();
    if let Some(token) = token {
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| DownloadError::InvalidToken)?;
        header_map.insert(AUTHORIZATION, auth_value);
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let request_error = |source| DownloadError::Request {
        url: url.to_string(),
        source,
    };
    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .headers(header_map)
        .send()
        .await
        .map_err(request_error)?;

    if !response.status().is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let bytes = response.bytes().await.map_err(request_error)?;

    let write_error = |source| DownloadError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }
    tokio::fs::write(path, bytes).await.map_err(write_error)?;
    Ok(())
}

/// Downloads `url` to `path` unless the file is already there.
async fn ensure_file(path: &Path, url: Option<&str>, token: Option<&str>, what: &str) {
    if path.exists() {
        return;
    }

    let Some(url) = url else {
        warn!("No {} at {:?} and no download URL set", what, path);
        return;
    };

    if let Err(e) = download_file(url, path, token).await {
        warn!("Failed to download {}: {}", what, e);
    }
}

/// Fetches missing checkpoints and their metadata files that have a download
/// URL configured. Failures are logged; loading falls back to an untrained
/// model for that plant, or to the default class order without metadata.
pub async fn ensure_checkpoints(settings: &Settings) {
    info!("Checking model checkpoints...");
    let token = settings.github_token.as_deref();
    for plant in Plant::ALL {
        let path = settings.checkpoint_for(plant);
        ensure_file(
            &path,
            settings.download_url_for(plant),
            token,
            &format!("{} checkpoint", plant),
        )
        .await;

        // Without a URL a missing metadata file is normal.
        if let Some(url) = settings.meta_url_for(plant) {
            ensure_file(
                &CheckpointMeta::sidecar_path(&path),
                Some(url),
                token,
                &format!("{} checkpoint metadata", plant),
            )
            .await;
        }
    }
}

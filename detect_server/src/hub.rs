//! Model hub access.
//!
//! The pretrained detection model lives in a remote hub repository and is
//! fetched once at process start into the local cache directory.
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use reqwest::Client;

const HUB_BASE_URL: &str = "https://huggingface.co";
const CACHE_DIR: &str = "wastecam";

/// Local cache path for a hub file.
pub fn cache_path(filename: &str) -> Result<PathBuf> {
    let dir = dirs::cache_dir()
        .context("no cache directory on this platform")?
        .join(CACHE_DIR);
    Ok(dir.join(filename))
}

/// Make sure the model file is available locally and return its path.
///
/// Downloads `https://{hub}/{repo}/resolve/main/{filename}` on a cache miss.
pub async fn ensure_model(repo: &str, filename: &str) -> Result<PathBuf> {
    let filepath = cache_path(filename)?;
    if filepath.exists() {
        log::info!("Using cached model {}", filepath.display());
        return Ok(filepath);
    }

    if let Some(parent) = filepath.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating cache directory {}", parent.display()))?;
    }

    let url = format!("{}/{}/resolve/main/{}", HUB_BASE_URL, repo, filename);
    log::info!("Downloading model from {}", &url);
    download_file(&Client::new(), &url, &filepath)
        .await
        .with_context(|| format!("downloading {}", &url))?;

    Ok(filepath)
}

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn cache_path_is_under_the_app_cache_dir() {
        let path = cache_path("model.onnx").unwrap();

        assert!(path.ends_with("wastecam/model.onnx"));
    }
}

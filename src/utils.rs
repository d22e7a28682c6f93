//! Utility functions
//!
use std::{fs, io::Cursor, path::Path};

use anyhow::{Context, Result};
use reqwest::Client;

/// Download a file from a URL to a given filepath.
///
/// The body lands in a sibling `.part` file first and is renamed into place,
/// so an interrupted transfer never leaves a truncated file behind.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let filepath = filepath.as_ref();
    if let Some(parent) = filepath.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    let resp = client.get(url).send().await?.error_for_status()?;

    let tmp_path = filepath.with_extension("part");
    let mut file = fs::File::create(&tmp_path)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;
    fs::rename(&tmp_path, filepath)?;

    Ok(())
}

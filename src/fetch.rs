// src/fetch.rs
use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::Url;

const GZIP_CONTENT_TYPE: &str = "application/x-gzip";

/// On-disk name for an extract: the archive file name minus its `.gz` suffix.
fn extract_file_name(url: &Url) -> Result<String> {
    let name = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| anyhow!("source URL {url} has no file name"))?;
    Ok(name.strip_suffix(".gz").unwrap_or(name).to_string())
}

/// Download one gzipped extract, decompress it and store the plain CSV under
/// `data_dir`.
///
/// Sources that do not announce themselves as gzip archives are skipped with
/// a warning rather than failing the run, and an extract that is already on
/// disk is not downloaded again. Returns the path of the stored CSV, or
/// `None` for a skipped source.
pub async fn download_extract(
    client: &Client,
    source: &str,
    data_dir: &Path,
) -> Result<Option<PathBuf>> {
    let url = Url::parse(source).with_context(|| format!("parsing source URL {source}"))?;
    let target = data_dir.join(extract_file_name(&url)?);
    if target.exists() {
        info!(target = %target.display(), "extract already on disk, skipping download");
        return Ok(Some(target));
    }

    let head = client
        .head(url.clone())
        .send()
        .await
        .with_context(|| format!("HEAD {url}"))?
        .error_for_status()?;
    let is_gzip = head
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == GZIP_CONTENT_TYPE)
        .unwrap_or(false);
    if !is_gzip {
        warn!(%url, "source is not a gzipped archive, not downloaded");
        return Ok(None);
    }

    let body = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("GET {url}"))?
        .error_for_status()?
        .bytes()
        .await
        .with_context(|| format!("reading body from {url}"))?;

    let mut decoder = GzDecoder::new(body.as_ref());
    let mut csv_text = Vec::new();
    decoder
        .read_to_end(&mut csv_text)
        .with_context(|| format!("decompressing {url}"))?;

    fs::write(&target, &csv_text).with_context(|| format!("writing {}", target.display()))?;
    info!(target = %target.display(), bytes = csv_text.len(), "extract saved");
    Ok(Some(target))
}

/// Download every configured source into `data_dir`, returning the extracts
/// that made it to disk.
pub async fn fetch_all(
    client: &Client,
    sources: &[String],
    data_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut extracts = Vec::new();
    for source in sources {
        if let Some(path) = download_extract(client, source, data_dir).await? {
            extracts.push(path);
        }
    }
    Ok(extracts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_suffix_is_stripped_from_the_target_name() {
        let url = Url::parse("https://example.com/test_data/vehicle.csv0001_part_00.gz").unwrap();
        assert_eq!(extract_file_name(&url).unwrap(), "vehicle.csv0001_part_00");
    }

    #[test]
    fn non_archive_names_are_kept_as_is() {
        let url = Url::parse("https://example.com/data/vehicle.csv").unwrap();
        assert_eq!(extract_file_name(&url).unwrap(), "vehicle.csv");
    }

    #[test]
    fn url_without_file_name_is_an_error() {
        let url = Url::parse("https://example.com/").unwrap();
        assert!(extract_file_name(&url).is_err());
    }
}

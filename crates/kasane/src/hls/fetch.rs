use std::path::Path;

use bytes::Bytes;
use reqwest::header::RANGE;

use super::manifest::SegmentEntry;
use crate::{
    error::{KasaneError, KasaneResult},
    util::{fs::write_atomic, http::HttpClient},
};

pub(crate) async fn fetch_segment(
    client: &HttpClient,
    segment: &SegmentEntry,
) -> KasaneResult<Bytes> {
    let mut request = client.get(segment.url.clone());
    if let Some(byte_range) = segment.byte_range {
        request = request.header(RANGE, byte_range.to_http_range());
    }
    let response = request.send().await?;
    if !response.status().is_success() {
        let status = response.status();
        if let Ok(body) = response.text().await {
            tracing::warn!("Error body: {body}");
        }
        return Err(KasaneError::HttpError(status));
    }

    let bytes = response.bytes().await?;
    Ok(bytes)
}

/// Store `segment` in `dir` unless a previous run already did.
///
/// Returns `false` when the segment was already on disk.
pub(crate) async fn download_segment(
    client: &HttpClient,
    segment: &SegmentEntry,
    dir: &Path,
    retries: u32,
) -> KasaneResult<bool> {
    let path = dir.join(&segment.file_name);
    if tokio::fs::metadata(&path)
        .await
        .map(|p| p.is_file() && p.len() > 0)
        .unwrap_or_default()
    {
        log::debug!("File {} already exists, skipping.", path.display());
        return Ok(false);
    }

    let filename = &segment.file_name;
    let mut retries = retries;
    loop {
        let result = match fetch_segment(client, segment).await {
            Ok(bytes) => write_atomic(&path, &bytes).await.map_err(KasaneError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => break,
            Err(e) => {
                if retries == 0 {
                    tracing::error!("Processing {filename} failed, max retries exceed. {e}");
                    return Err(e);
                }

                retries -= 1;
                tracing::warn!("Processing {filename} failed, retry later. {e}");
            }
        }
    }

    Ok(true)
}

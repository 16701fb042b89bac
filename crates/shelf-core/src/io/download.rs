//! Streaming downloads
//!
//! Transports hand back a [`ByteStream`]; this module turns an HTTP response
//! into one and writes streams to disk with progress callbacks.

use std::path::Path;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::USER_AGENT;
use crate::source::{ByteStream, TransportError};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// GET `url` and return the body as a stream.
///
/// A 404 becomes [`TransportError::NotFound`] so callers can tell a missing
/// package apart from an unreachable server.
///
/// # Errors
///
/// [`TransportError::NotFound`] for a 404, [`TransportError::Status`] for any other non-success status.
pub async fn open_stream(client: &Client, url: &str) -> Result<ByteStream, TransportError> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await?;

    match response.status() {
        StatusCode::NOT_FOUND => Err(TransportError::NotFound(url.to_string())),
        status if !status.is_success() => Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        }),
        _ => {
            let len = response.content_length();
            let inner = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from))
                .boxed();
            Ok(ByteStream { len, inner })
        }
    }
}

/// Write a stream to `dest`, calling `progress(downloaded, total)` after each
/// chunk. A partially written file is removed on failure.
///
/// # Errors
///
/// Fails on a stream error or when `dest` cannot be written.
pub async fn save_stream<F>(
    stream: ByteStream,
    dest: &Path,
    mut progress: F,
) -> Result<u64, DownloadError>
where
    F: FnMut(u64, Option<u64>),
{
    let ByteStream { len, mut inner } = stream;
    let mut file = File::create(dest).await?;
    let mut downloaded: u64 = 0;

    let result: Result<(), DownloadError> = async {
        while let Some(chunk) = inner.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded, len);
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        drop(file);
        tokio::fs::remove_file(dest).await.ok();
        return Err(e);
    }

    Ok(downloaded)
}

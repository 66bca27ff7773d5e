use std::path::Path;

use crate::{Error, Result};

/// Reads a settings file as raw text. The format (JSON or TOML) is left to
/// the consumer.
pub async fn load_settings_from_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    log::debug!("Loading settings from {}", path.display());
    let text = tokio::fs::read_to_string(path)
        .await
        .inspect_err(|e| log::error!("Cannot read settings {}: {e}", path.display()))?;
    Ok(text)
}

/// Fetches settings text with a single GET. Nothing is retried.
///
/// A non-success status fails with [`Error::Fetch`]. Its reason is the
/// standard phrase for the status code, not the text the server sent.
pub async fn load_settings_from_url(url: &str) -> Result<String> {
    log::debug!("Fetching settings from {url}");
    let response = reqwest::get(url)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Fetch {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_owned(),
        });
    }
    response
        .text()
        .await
        .map_err(|e| Error::Network(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::ErrorKind;

    /// Serves exactly one canned HTTP response and returns the URL to hit.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{address}/settings.toml")
    }

    #[tokio::test]
    async fn test_load_from_file_returns_raw_text() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[verify]\nverify_trust = false\n").unwrap();
        let text = load_settings_from_file(file.path()).await.unwrap();
        assert_eq!(text, "[verify]\nverify_trust = false\n");
    }

    #[tokio::test]
    async fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings_from_file(dir.path().join("missing.json"))
            .await
            .unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_from_url() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 19\r\nConnection: close\r\n\r\n{\"verify\":{}}      ",
        )
        .await;
        let text = load_settings_from_url(&url).await.unwrap();
        assert_eq!(text, "{\"verify\":{}}      ");
    }

    #[tokio::test]
    async fn test_load_from_url_not_found() {
        let url =
            serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        let err = load_settings_from_url(&url).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let message = err.to_string();
        assert!(message.contains("404"), "{message}");
        assert!(message.contains("Not Found"), "{message}");
    }

    #[tokio::test]
    async fn test_load_from_url_reports_standard_reason() {
        let url = serve_once(
            "HTTP/1.1 404 Gone Fishing\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        match load_settings_from_url(&url).await.unwrap_err() {
            Error::Fetch { status, reason } => {
                assert_eq!(status, 404);
                assert_eq!(reason, "Not Found");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_from_url_network_error_is_preserved() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/settings.json", listener.local_addr().unwrap());
        drop(listener);

        let expected = reqwest::get(&url).await.unwrap_err().to_string();
        let err = load_settings_from_url(&url).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(err.to_string(), expected);
    }
}

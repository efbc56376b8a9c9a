//! HTTP client for the face encoder service.
//!
//! The service takes an image upload as multipart field `file` and answers
//! with `{"success": .., "message": .., "data": {"features": [..]}}`.

use reqwest::blocking::{multipart, Client, Response};
use rollcall_core::{Encoder, EncodingError, FeatureVector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const INFO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
    data: Option<ExtractData>,
}

#[derive(Deserialize)]
struct ExtractData {
    features: Option<Vec<f64>>,
}

/// The service's verdict on whether an image is usable for recognition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCheck {
    pub is_valid: bool,
    #[serde(default)]
    pub message: String,
}

/// [`Encoder`] backed by the encoder service's `/extract-features` endpoint.
pub struct HttpEncoder {
    base_url: String,
    timeout: Duration,
    // Built on first use, which happens on the engine thread. A blocking
    // client must not be created from inside an async runtime.
    client: OnceLock<Client>,
}

impl HttpEncoder {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client: OnceLock::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the service whether `image` is usable, via `/validate`.
    pub fn validate_image(&self, image: &Path) -> Result<ImageCheck, EncodingError> {
        let body = self.post_image("/validate", image)?;
        serde_json::from_str(&body).map_err(malformed)
    }

    /// Fetch the service's self-description from its root endpoint.
    pub fn service_info(&self) -> Result<serde_json::Value, EncodingError> {
        let resp = self
            .client()?
            .get(format!("{}/", self.base_url))
            .timeout(INFO_TIMEOUT)
            .send()
            .map_err(unavailable)?;
        let body = read_body(resp)?;
        serde_json::from_str(&body).map_err(malformed)
    }

    fn client(&self) -> Result<&Client, EncodingError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(unavailable)?;
        Ok(self.client.get_or_init(|| client))
    }

    fn post_image(&self, endpoint: &str, image: &Path) -> Result<String, EncodingError> {
        let bytes = std::fs::read(image).map_err(|source| EncodingError::Io {
            path: image.to_path_buf(),
            source,
        })?;
        let file_name = image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture".to_string());
        let part = multipart::Part::bytes(bytes).file_name(file_name);
        let form = multipart::Form::new().part("file", part);

        let url = format!("{}{endpoint}", self.base_url);
        tracing::debug!(%url, image = %image.display(), "posting image to encoder");
        let resp = self
            .client()?
            .post(&url)
            .header("Accept", "application/json")
            .multipart(form)
            .send()
            .map_err(unavailable)?;
        read_body(resp)
    }
}

impl Encoder for HttpEncoder {
    fn encode(&self, image: &Path) -> Result<FeatureVector, EncodingError> {
        let body = self.post_image("/extract-features", image)?;
        let resp: ExtractResponse = serde_json::from_str(&body).map_err(malformed)?;
        let features = resp
            .data
            .and_then(|data| data.features)
            .filter(|features| !features.is_empty());
        match features {
            Some(values) if resp.success => {
                tracing::debug!(dim = values.len(), "encoder returned features");
                Ok(FeatureVector::new(values))
            }
            _ => {
                tracing::info!(
                    image = %image.display(),
                    message = %resp.message,
                    "encoder found no usable face"
                );
                Err(EncodingError::NoFaceDetected(image.to_path_buf()))
            }
        }
    }
}

fn read_body(resp: Response) -> Result<String, EncodingError> {
    let status = resp.status();
    let body = resp.text().map_err(unavailable)?;
    if !status.is_success() {
        return Err(EncodingError::Unavailable(format!("HTTP {status}: {body}")));
    }
    Ok(body)
}

fn unavailable(err: reqwest::Error) -> EncodingError {
    EncodingError::Unavailable(err.to_string())
}

fn malformed(err: serde_json::Error) -> EncodingError {
    EncodingError::Malformed(err.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rollcall_core::RecognitionError;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::JoinHandle;

    /// Serve the canned `(status, body)` replies one connection at a time on
    /// a loopback port. The join handle yields each raw request received.
    pub(crate) fn serve(replies: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let mut requests = Vec::new();
            for (status, body) in replies {
                let (mut stream, _) = listener.accept().unwrap();
                requests.push(read_request(&mut stream));
                let reply = format!(
                    "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(reply.as_bytes()).unwrap();
            }
            requests
        });
        (url, handle)
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                return String::from_utf8_lossy(&buf).into_owned();
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_end + length {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn capture(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("capture.jpg");
        std::fs::write(&path, b"jpeg-bytes-for-upload").unwrap();
        path
    }

    #[test]
    fn test_encode_posts_image_and_reads_features() {
        let dir = tempfile::tempdir().unwrap();
        let image = capture(&dir);
        let (url, server) = serve(vec![(
            200,
            r#"{"success": true, "message": "ok", "data": {"features": [0.5, -0.25, 1.0]}}"#,
        )]);

        let encoder = HttpEncoder::new(&format!("{url}/"), Duration::from_secs(5));
        assert_eq!(encoder.base_url(), url);
        let v = encoder.encode(&image).unwrap();
        assert_eq!(v.as_slice(), &[0.5, -0.25, 1.0]);

        let requests = server.join().unwrap();
        let request = &requests[0];
        assert!(request.starts_with("POST /extract-features HTTP/1.1"));
        assert!(request.contains("name=\"file\"; filename=\"capture.jpg\""));
        assert!(request.contains("jpeg-bytes-for-upload"));
    }

    #[test]
    fn test_encode_without_face() {
        let dir = tempfile::tempdir().unwrap();
        let image = capture(&dir);
        let (url, server) = serve(vec![
            (200, r#"{"success": false, "message": "No face detected"}"#),
            (200, r#"{"success": true, "data": {"features": []}}"#),
            (200, r#"{"success": true, "data": {}}"#),
        ]);

        let encoder = HttpEncoder::new(&url, Duration::from_secs(5));
        for _ in 0..3 {
            assert!(matches!(
                encoder.encode(&image),
                Err(EncodingError::NoFaceDetected(_))
            ));
        }
        server.join().unwrap();
    }

    #[test]
    fn test_encode_bad_payloads_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let image = capture(&dir);
        let (url, server) = serve(vec![
            (200, "<html>gateway</html>"),
            (200, r#"{"success": true, "data": {"features": [1.0, "x"]}}"#),
        ]);

        let encoder = HttpEncoder::new(&url, Duration::from_secs(5));
        for _ in 0..2 {
            assert!(matches!(
                encoder.encode(&image),
                Err(EncodingError::Malformed(_))
            ));
        }
        server.join().unwrap();
    }

    #[test]
    fn test_http_error_is_unavailable_and_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let image = capture(&dir);
        let (url, server) = serve(vec![(503, r#"{"detail": "model loading"}"#)]);

        let err = HttpEncoder::new(&url, Duration::from_secs(5))
            .encode(&image)
            .unwrap_err();
        match &err {
            EncodingError::Unavailable(msg) => assert!(msg.contains("503")),
            other => panic!("expected Unavailable, got {other:?}"),
        }
        assert!(RecognitionError::Encoding(err).is_retryable());
        server.join().unwrap();
    }

    #[test]
    fn test_unreachable_service_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let image = capture(&dir);
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let encoder = HttpEncoder::new(&format!("http://127.0.0.1:{port}"), Duration::from_secs(2));
        assert!(matches!(
            encoder.encode(&image),
            Err(EncodingError::Unavailable(_))
        ));
    }

    #[test]
    fn test_missing_image_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = HttpEncoder::new("http://127.0.0.1:9", Duration::from_secs(1));
        assert!(matches!(
            encoder.encode(&dir.path().join("absent.jpg")),
            Err(EncodingError::Io { .. })
        ));
    }

    #[test]
    fn test_validate_image_and_service_info() {
        let dir = tempfile::tempdir().unwrap();
        let image = capture(&dir);
        let (url, server) = serve(vec![
            (200, r#"{"is_valid": false, "message": "Image too dark"}"#),
            (200, r#"{"service": "face-encoder", "version": "2.1"}"#),
        ]);

        let encoder = HttpEncoder::new(&url, Duration::from_secs(5));
        let check = encoder.validate_image(&image).unwrap();
        assert_eq!(
            check,
            ImageCheck {
                is_valid: false,
                message: "Image too dark".into(),
            }
        );
        let info = encoder.service_info().unwrap();
        assert_eq!(info["service"], "face-encoder");

        let requests = server.join().unwrap();
        assert!(requests[0].starts_with("POST /validate HTTP/1.1"));
        assert!(requests[1].starts_with("GET / HTTP/1.1"));
    }
}

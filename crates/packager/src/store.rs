use std::{io, path::Path};

use derive_more::{Display, Error, From};
use itertools::Itertools;
use reqwest::{
    header::{HeaderMap, COOKIE, SET_COOKIE},
    multipart::{Form, Part},
    Client,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::packager::DEFAULT_ARCHIVE_NAME;

/// Package store API errors.
#[derive(Debug, Display, From, Error)]
pub(crate) enum StoreError {
    /// HTTP client error.
    Http(reqwest::Error),

    /// IO-related error.
    Io(io::Error),

    /// API responded with a non-zero error code.
    #[from(ignore)]
    #[display(fmt = "API response error: {} {}", code, message)]
    Api {
        /// Error code.
        code: i64,

        /// Error message.
        message: String,
    },
}

/// JSON request body used to log in with account credentials.
#[derive(Serialize)]
struct LoginRequest<'a> {
    /// Account email.
    email: &'a str,

    /// Account password.
    password: &'a str,
}

/// Common JSON response envelope.
#[derive(Deserialize)]
struct ApiResponse {
    /// Error code, positive values indicate a failure.
    #[serde(default)]
    code: Option<i64>,

    /// Error description.
    #[serde(default)]
    message: Option<String>,
}

impl ApiResponse {
    /// Convert an error code into [`StoreError::Api`].
    fn into_result(self) -> Result<(), StoreError> {
        match self.code {
            Some(code) if code > 0 => Err(StoreError::Api {
                code,
                message: self.message.unwrap_or_default(),
            }),
            _ => Ok(()),
        }
    }
}

/// Authenticated package store session.
pub(crate) struct UploadSession {
    /// Base API URL with a trailing slash.
    base_url: String,

    /// HTTP client.
    client: Client,

    /// Session cookies returned on login.
    cookies: String,
}

impl UploadSession {
    /// Log in with account credentials and keep the session cookies.
    pub(crate) async fn login(
        base_url: &str,
        email: &str,
        password: &str,
    ) -> Result<Self, StoreError> {
        let base_url = if base_url.ends_with('/') {
            base_url.to_owned()
        } else {
            format!("{base_url}/")
        };

        let client = Client::new();

        let response = client
            .post(format!("{base_url}user/login"))
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let cookies = session_cookies(response.headers());

        response.json::<ApiResponse>().await?.into_result()?;

        debug!(%cookies, "logged in");

        Ok(Self {
            base_url,
            client,
            cookies,
        })
    }

    /// Upload the archive file as a new package version of `pid`.
    pub(crate) async fn upload_package(&self, pid: &str, archive: &Path) -> Result<(), StoreError> {
        let content = tokio::fs::read(archive).await?;

        let file_name = archive
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(DEFAULT_ARCHIVE_NAME)
            .to_owned();

        let form = Form::new().part(
            "zip",
            Part::bytes(content)
                .file_name(file_name)
                .mime_str("application/zip")?,
        );

        self.client
            .post(format!("{}dapp/{pid}/packages", self.base_url))
            .header(COOKIE, &self.cookies)
            .multipart(form)
            .send()
            .await?
            .json::<ApiResponse>()
            .await?
            .into_result()?;

        debug!(%pid, "package uploaded");

        Ok(())
    }
}

/// Join `name=value` pairs of every `Set-Cookie` header with `;`.
fn session_cookies(headers: &HeaderMap) -> String {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .join(";")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
    use tempfile::TempDir;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };

    use super::{session_cookies, ApiResponse, StoreError, UploadSession};

    /// Serve a single HTTP request with a canned `response`.
    ///
    /// Returns the server base URL and a handle resolving to the raw request.
    async fn serve_once(response: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0; 4096];

            loop {
                let read = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..read]);

                if read == 0 || is_complete(&request) {
                    break;
                }
            }

            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();

            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{address}/api"), handle)
    }

    /// Whether the buffered request contains headers and the whole body.
    fn is_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);

        let Some(headers_end) = text.find("\r\n\r\n") else {
            return false;
        };

        let content_length = text[..headers_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok());

        match content_length {
            Some(length) => request.len() >= headers_end + 4 + length,
            None => !text[..headers_end].to_ascii_lowercase().contains("chunked")
                || text.ends_with("0\r\n\r\n"),
        }
    }

    #[test]
    fn cookies_from_headers() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("sid=abc; Path=/; HttpOnly"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("lang=en"));

        assert_eq!(session_cookies(&headers), "sid=abc;lang=en");
        assert_eq!(session_cookies(&HeaderMap::new()), "");
    }

    #[test]
    fn api_response_codes() {
        let ok: ApiResponse = serde_json::from_str(r#"{"code": 0, "data": {}}"#).unwrap();
        assert!(ok.into_result().is_ok());

        let ok: ApiResponse = serde_json::from_str(r#"{"data": {}}"#).unwrap();
        assert!(ok.into_result().is_ok());

        let failed: ApiResponse =
            serde_json::from_str(r#"{"code": 1001, "message": "invalid password"}"#).unwrap();

        match failed.into_result() {
            Err(error @ StoreError::Api { code: 1001, .. }) => {
                assert_eq!(error.to_string(), "API response error: 1001 invalid password")
            }
            _ => panic!("expected an API error"),
        }
    }

    #[tokio::test]
    async fn login_and_upload() {
        let (base_url, login_request) = serve_once(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/json\r\n\
             Set-Cookie: sid=abc; Path=/; HttpOnly\r\n\
             Set-Cookie: lang=en\r\n\
             Content-Length: 11\r\n\
             Connection: close\r\n\r\n\
             {\"code\":0}\n",
        )
        .await;

        let session = UploadSession::login(&base_url, "dev@example.com", "secret")
            .await
            .unwrap();

        let request = login_request.await.unwrap();
        assert!(request.starts_with("POST /api/user/login HTTP/1.1"));
        assert!(request.contains(r#"{"email":"dev@example.com","password":"secret"}"#));
        assert_eq!(session.cookies, "sid=abc;lang=en");

        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("archive.zip");
        fs::write(&archive, b"PK").unwrap();

        let (base_url, upload_request) = serve_once(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/json\r\n\
             Content-Length: 11\r\n\
             Connection: close\r\n\r\n\
             {\"code\":0}\n",
        )
        .await;

        let session = UploadSession {
            base_url: format!("{base_url}/"),
            ..session
        };

        session.upload_package("7", &archive).await.unwrap();

        let request = upload_request.await.unwrap();
        assert!(request.starts_with("POST /api/dapp/7/packages HTTP/1.1"));
        assert!(request.contains("cookie: sid=abc;lang=en"));
        assert!(request.contains(r#"name="zip"; filename="archive.zip""#));
    }

    #[tokio::test]
    async fn login_rejected() {
        let (base_url, _) = serve_once(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/json\r\n\
             Content-Length: 43\r\n\
             Connection: close\r\n\r\n\
             {\"code\":1001,\"message\":\"invalid password\"}\n",
        )
        .await;

        let result = UploadSession::login(&base_url, "dev@example.com", "wrong").await;

        assert!(matches!(result, Err(StoreError::Api { code: 1001, .. })));
    }
}

// ============================================================
// Layer 6 — HTTP Image Fetcher
// ============================================================
// One blocking GET per image URL, bounded by the configured
// timeout. No retries: a failed fetch drops that sample only.
//
// Reference: reqwest blocking client documentation

use anyhow::{Context, Result};
use std::time::Duration;

use crate::domain::traits::ImageFetcher;

pub struct HttpImageFetcher {
    client: reqwest::blocking::Client,
}

impl HttpImageFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("imagecap-finetune/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;

        let bytes = response
            .bytes()
            .with_context(|| format!("cannot read body of {url}"))?;
        Ok(bytes.to_vec())
    }
}

// ─── Test Fixtures ────────────────────────────────────────────────────────────
// A loopback server answering a fixed number of connections with canned
// responses, so fetch behaviour can be checked without the network.
#[cfg(test)]
pub mod test_support {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// (status line, body) per path, e.g. ("/ok.png", "200 OK", bytes).
    pub type Route = (&'static str, &'static str, Vec<u8>);

    /// Serve `routes` on an ephemeral port; returns the base URL.
    /// Unknown paths get a 404. The server thread stops after
    /// `max_requests` connections.
    pub fn serve(routes: Vec<Route>, max_requests: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            for stream in listener.incoming().take(max_requests) {
                let Ok(mut stream) = stream else { continue };
                let mut buf = [0u8; 2048];
                let n = stream.read(&mut buf).unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                let (status, body) = routes
                    .iter()
                    .find(|(p, _, _)| *p == path)
                    .map(|(_, s, b)| (*s, b.clone()))
                    .unwrap_or(("404 Not Found", Vec::new()));

                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            }
        });

        format!("http://{addr}")
    }
}

use std::collections::HashMap;
use std::io::Read as _;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use sha2::Digest as _;

/// Minimal stand-in for an IPFS node's `/api/v0/add` endpoint. Keeps every
/// uploaded file in memory, addressed by a fake CID.
pub struct IpfsStub {
    pub base_url: String,
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl IpfsStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start ipfs stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let blobs: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::default();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn({
            let blobs = Arc::clone(&blobs);
            move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };

                    let path = request.url().to_string();
                    if request.method() != &tiny_http::Method::Post
                        || !path.starts_with("/api/v0/add")
                    {
                        let _ = request.respond(
                            tiny_http::Response::from_string("not found").with_status_code(404),
                        );
                        continue;
                    }

                    let boundary = request
                        .headers()
                        .iter()
                        .find(|h| h.field.equiv("Content-Type"))
                        .and_then(|h| {
                            h.value
                                .as_str()
                                .split("boundary=")
                                .nth(1)
                                .map(|b| b.trim_matches('"').to_owned())
                        });
                    let Some(boundary) = boundary else {
                        let _ = request.respond(
                            tiny_http::Response::from_string("missing multipart boundary")
                                .with_status_code(400),
                        );
                        continue;
                    };

                    let mut body = Vec::new();
                    if request.as_reader().read_to_end(&mut body).is_err() {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid request body")
                                .with_status_code(400),
                        );
                        continue;
                    }

                    let Some(file) = multipart_file(&body, &boundary) else {
                        let _ = request.respond(
                            tiny_http::Response::from_string("missing file part")
                                .with_status_code(400),
                        );
                        continue;
                    };

                    let cid = format!("bafy{}", &hex::encode(sha2::Sha256::digest(&file))[..32]);
                    let size = file.len();
                    blobs
                        .lock()
                        .expect("ipfs stub lock")
                        .insert(cid.clone(), file);

                    let response = serde_json::json!({
                        "Name": "blob",
                        "Hash": cid,
                        "Size": size.to_string(),
                    });
                    let _ = request.respond(tiny_http::Response::from_string(format!(
                        "{response}\n"
                    )));
                }
            }
        });

        Self {
            base_url,
            blobs,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn get(&self, cid: &str) -> Option<Vec<u8>> {
        self.blobs.lock().expect("ipfs stub lock").get(cid).cloned()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.blobs.lock().expect("ipfs stub lock").len()
    }
}

impl Drop for IpfsStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Content of the single part of a `multipart/form-data` body.
fn multipart_file(body: &[u8], boundary: &str) -> Option<Vec<u8>> {
    let opening = format!("--{boundary}");
    let start = find(body, opening.as_bytes())? + opening.len();
    let headers_end = start + find(&body[start..], b"\r\n\r\n")? + 4;
    let closing = format!("\r\n--{boundary}");
    let end = headers_end + find(&body[headers_end..], closing.as_bytes())?;
    Some(body[headers_end..end].to_vec())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

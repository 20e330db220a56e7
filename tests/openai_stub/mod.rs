use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum AnalysisBehavior {
    /// Reply with this topics payload (wrapped in prose to exercise JSON recovery).
    Topics(Value),
    /// Reply with text that is not a JSON object.
    Garbage,
    /// Reply with an API error.
    ServerError,
}

pub struct OpenAiStub {
    pub base_url: String,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl OpenAiStub {
    pub fn spawn(behavior: AnalysisBehavior) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start openai stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");

        let requests = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn({
            let requests = Arc::clone(&requests);
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
                    if request.method() != &tiny_http::Method::Post || path != "/v1/responses" {
                        let _ = request.respond(
                            tiny_http::Response::from_string("not found").with_status_code(404),
                        );
                        continue;
                    }
                    requests.fetch_add(1, Ordering::SeqCst);

                    let mut body = String::new();
                    if request.as_reader().read_to_string(&mut body).is_err() {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid request body")
                                .with_status_code(400),
                        );
                        continue;
                    }

                    let parsed: Value = match serde_json::from_str(&body) {
                        Ok(value) => value,
                        Err(_) => {
                            let _ = request.respond(
                                tiny_http::Response::from_string("invalid json")
                                    .with_status_code(400),
                            );
                            continue;
                        }
                    };

                    let has_script = parsed
                        .get("input")
                        .and_then(|v| v.as_str())
                        .is_some_and(|input| input.contains('['));
                    if !has_script {
                        let _ = request.respond(
                            tiny_http::Response::from_string("missing tagged script input")
                                .with_status_code(400),
                        );
                        continue;
                    }

                    let output_text = match &behavior {
                        AnalysisBehavior::Topics(payload) => {
                            format!("Here are the topics:\n{payload}\n")
                        }
                        AnalysisBehavior::Garbage => "I could not find any topics.".to_owned(),
                        AnalysisBehavior::ServerError => {
                            let error = serde_json::json!({
                                "error": { "message": "stub overloaded", "type": "server_error" }
                            });
                            let _ = request.respond(
                                tiny_http::Response::from_string(error.to_string())
                                    .with_status_code(500),
                            );
                            continue;
                        }
                    };

                    let response_body = serde_json::json!({
                        "id": "resp_stub",
                        "object": "response",
                        "model": parsed.get("model").cloned().unwrap_or(Value::String("stub-model".to_owned())),
                        "output": [
                            {
                                "type": "message",
                                "role": "assistant",
                                "content": [
                                    { "type": "output_text", "text": output_text }
                                ]
                            }
                        ]
                    });

                    let header = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"application/json"[..],
                    )
                    .expect("build header");
                    let response = tiny_http::Response::from_string(response_body.to_string())
                        .with_status_code(200)
                        .with_header(header);
                    let _ = request.respond(response);
                }
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for OpenAiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

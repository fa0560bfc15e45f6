use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use serde_json::Value;

/// How the stub answers the joint (JSON) translation prompt.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum StructuredBehavior {
    /// Reply with a well-formed object.
    Json,
    /// Reply with prose so the caller has to fall back.
    Prose,
}

/// Chat-completions stub. Every rendering is the input prefixed with `EN `.
pub struct CompletionStub {
    pub base_url: String,
    calls: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CompletionStub {
    pub fn spawn(behavior: StructuredBehavior) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start completion stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");

        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
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
                if request.method() != &tiny_http::Method::Post || path != "/v1/chat/completions" {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }

                let (kind, content) = match reply_for(&body, behavior) {
                    Ok(reply) => reply,
                    Err(err) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string(format!(
                                r#"{{"error":{{"message":"{err}"}}}}"#
                            ))
                            .with_status_code(400),
                        );
                        continue;
                    }
                };
                if let Ok(mut calls) = seen.lock() {
                    calls.push(kind.to_owned());
                }

                let response_body = serde_json::json!({
                    "id": "chatcmpl-stub",
                    "object": "chat.completion",
                    "model": "stub-model",
                    "choices": [
                        {
                            "index": 0,
                            "message": { "role": "assistant", "content": content },
                            "finish_reason": "stop"
                        }
                    ]
                });

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(response_body.to_string())
                    .with_status_code(200)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            calls,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Prompt kinds seen so far: `structured`, `review` or `person`.
    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Drop for CompletionStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn english(text: &str) -> String {
    if text.trim().is_empty() {
        String::new()
    } else {
        format!("EN {}", text.trim())
    }
}

fn reply_for(body: &str, behavior: StructuredBehavior) -> anyhow::Result<(&'static str, String)> {
    let parsed: Value = serde_json::from_str(body).context("parse request json")?;
    let system = parsed
        .pointer("/messages/0/content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing system message"))?;
    let user = parsed
        .pointer("/messages/1/content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing user message"))?;

    if system.contains("Only return JSON") {
        if matches!(behavior, StructuredBehavior::Prose) {
            return Ok(("structured", "Sorry, here is my best attempt.".to_owned()));
        }
        let input: Value = serde_json::from_str(user).context("parse structured payload")?;
        let field = |key: &str| input.get(key).and_then(|v| v.as_str()).unwrap_or_default();
        let people = input
            .get("people")
            .and_then(|v| v.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str())
                    .map(english)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let reply = serde_json::json!({
            "title": english(field("title")),
            "comment": english(field("comment")),
            "people": people,
        });
        return Ok(("structured", format!("```json\n{reply}\n```")));
    }

    if system.contains("transliterate") {
        return Ok(("person", english(user)));
    }

    Ok(("review", english(user)))
}

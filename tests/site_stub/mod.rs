use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// One server standing in for the source site and both destination searches.
///
/// - `/book/people/u1/collect`, `/movie/people/u1/collect`: one item on the
///   first page, an empty page afterwards.
/// - `/movie/subject/2/`: detail page with a tagged director.
/// - `/search` (Goodreads) and `/find/` (IMDb): one result each.
pub struct SiteStub {
    pub base_url: String,
    requested: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
pub const USER_ID: &str = "u1";

impl SiteStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start site stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requested = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requested);
        let site = base_url.clone();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                if let Ok(mut seen) = seen.lock() {
                    seen.push(url.clone());
                }
                let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
                let first_page = query.split('&').any(|pair| pair == "start=0");

                let (status, body) = match path {
                    "/book/people/u1/collect" if first_page => (200, book_listing(&site)),
                    "/movie/people/u1/collect" if first_page => (200, movie_listing(&site)),
                    "/book/people/u1/collect" | "/movie/people/u1/collect" => {
                        (200, "<html><body></body></html>".to_owned())
                    }
                    "/movie/subject/2/" => (200, MOVIE_DETAIL.to_owned()),
                    "/search" => (200, GOODREADS_RESULTS.to_owned()),
                    "/find/" => (200, IMDB_RESULTS.to_owned()),
                    _ => (404, "not found".to_owned()),
                };

                let header = tiny_http::Header::from_bytes(
                    &b"Content-Type"[..],
                    &b"text/html; charset=utf-8"[..],
                )
                .expect("build header");
                let response = tiny_http::Response::from_string(body)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requested,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    #[allow(dead_code)]
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }

    #[allow(dead_code)]
    pub fn book_subject(&self) -> String {
        format!("{}/book/subject/1/", self.base_url)
    }

    #[allow(dead_code)]
    pub fn movie_subject(&self) -> String {
        format!("{}/movie/subject/2/", self.base_url)
    }
}

impl Drop for SiteStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn book_listing(site: &str) -> String {
    format!(
        r#"<!doctype html>
<html><body><ul>
  <li class="subject-item">
    <div class="info">
      <h2><a href="{site}/book/subject/1/">活着</a></h2>
      <div class="pub">余华 / 作家出版社 / 2012-8-1</div>
      <div class="short-note">
        <span class="rating5-t"></span>
        <span class="date">2023-01-05 读过</span>
        <p class="comment">非常震撼</p>
      </div>
    </div>
  </li>
</ul></body></html>
"#
    )
}

fn movie_listing(site: &str) -> String {
    format!(
        r#"<!doctype html>
<html><body>
  <div class="item">
    <div class="info"><ul>
      <li class="title"><a href="{site}/movie/subject/2/">英雄 / Hero</a></li>
      <li><span class="rating4-t"></span><span class="date">2021-05-01</span></li>
      <li><span class="comment">画面很美</span></li>
    </ul></div>
  </div>
</body></html>
"#
    )
}

const MOVIE_DETAIL: &str = r#"<!doctype html>
<html><body>
  <div id="info">
    <span>导演: <a rel="v:directedBy" href="/celebrity/1/">张艺谋</a></span>
    <span>主演: 李连杰</span>
  </div>
</body></html>
"#;

const GOODREADS_RESULTS: &str = r#"<!doctype html>
<html><body><table>
  <tr><td><a class="bookTitle" href="/book/show/42.To_Live"><span>To Live</span></a></td></tr>
  <tr><td><a class="bookTitle" href="/book/show/43.Other">Other</a></td></tr>
</table></body></html>
"#;

const IMDB_RESULTS: &str = r#"<!doctype html>
<html><body><table>
  <tr><td class="result_text"><a href="/title/tt0299977/?ref_=fn_al_tt_1">Hero</a></td></tr>
</table></body></html>
"#;

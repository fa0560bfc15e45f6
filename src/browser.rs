use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};

use crate::config::BrowserConfig;

/// `click` and `fill` return `Ok(false)` when the locator does not match a
/// visible element within `timeout`; `Err` is reserved for driver failures.
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> anyhow::Result<()>;
    async fn click(&mut self, locator: &str, timeout: Duration) -> anyhow::Result<bool>;
    async fn fill(&mut self, locator: &str, text: &str, timeout: Duration) -> anyhow::Result<bool>;
    async fn wait(&mut self, duration: Duration) -> anyhow::Result<()>;
    async fn close(&mut self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait OperatorGate: Send + Sync {
    async fn wait_until_ready(&self, destination: &str) -> anyhow::Result<()>;
}

pub struct StdinGate;

#[async_trait]
impl OperatorGate for StdinGate {
    async fn wait_until_ready(&self, destination: &str) -> anyhow::Result<()> {
        eprintln!("Log in to {destination} in the opened browser window, then press Enter here.");
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .context("read operator confirmation")?;
        Ok(())
    }
}

pub struct NoGate;

#[async_trait]
impl OperatorGate for NoGate {
    async fn wait_until_ready(&self, destination: &str) -> anyhow::Result<()> {
        tracing::info!(destination, "login gate disabled");
        Ok(())
    }
}

const PLAYWRIGHT_DRIVER: &str = r#"
const readline = require('readline');
const { chromium } = require('playwright');

const reply = (value) => process.stdout.write(JSON.stringify(value) + '\n');

(async () => {
    const context = await chromium.launchPersistentContext(process.env.SHELFSYNC_PROFILE_DIR, {
        headless: process.env.SHELFSYNC_HEADLESS === '1',
        userAgent: process.env.SHELFSYNC_USER_AGENT || undefined,
    });
    const page = context.pages()[0] || (await context.newPage());
    reply({ ok: true, ready: true });

    const lines = readline.createInterface({ input: process.stdin });
    for await (const line of lines) {
        if (!line.trim()) continue;
        let cmd;
        try {
            cmd = JSON.parse(line);
        } catch (err) {
            reply({ ok: false, error: 'bad command: ' + err.message });
            continue;
        }
        try {
            switch (cmd.op) {
                case 'goto':
                    await page.goto(cmd.url, { waitUntil: 'domcontentloaded', timeout: 60000 });
                    reply({ ok: true });
                    break;
                case 'click':
                case 'fill': {
                    const target = page.locator(cmd.locator).first();
                    let found = true;
                    try {
                        await target.waitFor({ state: 'visible', timeout: cmd.timeout_ms });
                    } catch (_) {
                        found = false;
                    }
                    if (found) {
                        if (cmd.op === 'click') await target.click();
                        else await target.fill(cmd.text);
                    }
                    reply({ ok: true, found });
                    break;
                }
                case 'wait':
                    await page.waitForTimeout(cmd.ms);
                    reply({ ok: true });
                    break;
                case 'close':
                    await context.close();
                    reply({ ok: true });
                    process.exit(0);
                default:
                    reply({ ok: false, error: 'unknown op: ' + cmd.op });
            }
        } catch (err) {
            reply({ ok: false, error: String((err && err.message) || err) });
        }
    }
    await context.close();
})().catch((err) => {
    process.stderr.write(String((err && err.stack) || err) + '\n');
    process.exit(1);
});
"#;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum DriverCommand<'a> {
    Goto { url: &'a str },
    Click { locator: &'a str, timeout_ms: u64 },
    Fill { locator: &'a str, text: &'a str, timeout_ms: u64 },
    Wait { ms: u64 },
    Close,
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    ok: bool,
    #[serde(default)]
    found: bool,
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct PlaywrightSession<W = ChildStdin, R = BufReader<ChildStdout>> {
    child: Option<Child>,
    commands: W,
    replies: Lines<R>,
}

impl PlaywrightSession {
    pub async fn launch(
        config: &BrowserConfig,
        profile_dir: &Path,
        user_agent: Option<&str>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(profile_dir)
            .with_context(|| format!("create browser profile dir: {}", profile_dir.display()))?;

        let mut cmd = tokio::process::Command::new(&config.node_bin);
        cmd.arg("-e")
            .arg(PLAYWRIGHT_DRIVER)
            .env("SHELFSYNC_PROFILE_DIR", profile_dir)
            .env("SHELFSYNC_HEADLESS", if config.headless { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(user_agent) = user_agent {
            cmd.env("SHELFSYNC_USER_AGENT", user_agent);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn playwright driver: {}", config.node_bin))?;
        let commands = child.stdin.take().context("open driver stdin")?;
        let stdout = child.stdout.take().context("open driver stdout")?;

        let mut session = Self {
            child: Some(child),
            commands,
            replies: BufReader::new(stdout).lines(),
        };
        session
            .await_ready()
            .await
            .context("start playwright driver (is the `playwright` node package installed?)")?;
        tracing::info!(profile = %profile_dir.display(), headless = config.headless, "browser ready");
        Ok(session)
    }
}

impl<W, R> PlaywrightSession<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_reply(&mut self) -> anyhow::Result<DriverReply> {
        let line = self
            .replies
            .next_line()
            .await
            .context("read driver reply")?
            .ok_or_else(|| anyhow::anyhow!("browser driver exited"))?;
        serde_json::from_str(&line).with_context(|| format!("parse driver reply: {line}"))
    }

    async fn await_ready(&mut self) -> anyhow::Result<()> {
        let reply = self.next_reply().await?;
        if !reply.ok || !reply.ready {
            anyhow::bail!(
                "driver not ready: {}",
                reply.error.unwrap_or_else(|| "no ready signal".to_owned())
            );
        }
        Ok(())
    }

    async fn request(&mut self, command: &DriverCommand<'_>) -> anyhow::Result<DriverReply> {
        let mut line = serde_json::to_vec(command).context("serialize driver command")?;
        line.push(b'\n');
        self.commands
            .write_all(&line)
            .await
            .context("write driver command")?;
        self.commands.flush().await.context("flush driver command")?;

        let reply = self.next_reply().await?;
        if !reply.ok {
            anyhow::bail!(
                "driver error: {}",
                reply.error.unwrap_or_else(|| "unknown".to_owned())
            );
        }
        Ok(reply)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl<W, R> BrowserSession for PlaywrightSession<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncBufRead + Unpin + Send,
{
    async fn goto(&mut self, url: &str) -> anyhow::Result<()> {
        self.request(&DriverCommand::Goto { url })
            .await
            .with_context(|| format!("navigate to {url}"))?;
        Ok(())
    }

    async fn click(&mut self, locator: &str, timeout: Duration) -> anyhow::Result<bool> {
        let reply = self
            .request(&DriverCommand::Click {
                locator,
                timeout_ms: millis(timeout),
            })
            .await?;
        Ok(reply.found)
    }

    async fn fill(&mut self, locator: &str, text: &str, timeout: Duration) -> anyhow::Result<bool> {
        let reply = self
            .request(&DriverCommand::Fill {
                locator,
                text,
                timeout_ms: millis(timeout),
            })
            .await?;
        Ok(reply.found)
    }

    async fn wait(&mut self, duration: Duration) -> anyhow::Result<()> {
        self.request(&DriverCommand::Wait {
            ms: millis(duration),
        })
        .await?;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.request(&DriverCommand::Close).await?;
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(Duration::from_secs(10), child.wait()).await {
                Ok(status) => {
                    let status = status.context("wait browser driver")?;
                    tracing::debug!(%status, "browser driver exited");
                }
                Err(_) => {
                    tracing::warn!("browser driver did not exit; killing");
                    child.kill().await.context("kill browser driver")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(replies: &str) -> PlaywrightSession<Vec<u8>, BufReader<&[u8]>> {
        PlaywrightSession {
            child: None,
            commands: Vec::new(),
            replies: BufReader::new(replies.as_bytes()).lines(),
        }
    }

    fn sent(session: &PlaywrightSession<Vec<u8>, BufReader<&[u8]>>) -> Vec<serde_json::Value> {
        String::from_utf8_lossy(&session.commands)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    #[tokio::test]
    async fn commands_are_json_lines_and_replies_are_read_in_order() -> anyhow::Result<()> {
        let mut session = scripted(concat!(
            "{\"ok\":true,\"ready\":true}\n",
            "{\"ok\":true}\n",
            "{\"ok\":true,\"found\":false}\n",
            "{\"ok\":true,\"found\":true}\n",
        ));
        session.await_ready().await?;
        session.goto("https://www.imdb.com/title/tt1/").await?;
        assert!(!session.click("#missing", Duration::from_millis(250)).await?);
        assert!(session.fill("textarea", "Great", Duration::from_secs(3)).await?);

        let sent = sent(&session);
        assert_eq!(
            sent,
            vec![
                serde_json::json!({"op": "goto", "url": "https://www.imdb.com/title/tt1/"}),
                serde_json::json!({"op": "click", "locator": "#missing", "timeout_ms": 250}),
                serde_json::json!({"op": "fill", "locator": "textarea", "text": "Great", "timeout_ms": 3000}),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn driver_error_reply_becomes_err() {
        let mut session = scripted("{\"ok\":false,\"error\":\"net::ERR_NAME_NOT_RESOLVED\"}\n");
        let err = session
            .goto("https://nowhere.invalid/")
            .await
            .err()
            .map(|e| format!("{e:#}"))
            .unwrap_or_default();
        assert!(err.contains("ERR_NAME_NOT_RESOLVED"), "err={err}");
    }

    #[tokio::test]
    async fn driver_exit_is_reported() {
        let mut session = scripted("");
        assert!(session.wait(Duration::from_millis(10)).await.is_err());
    }

    #[tokio::test]
    async fn missing_ready_signal_fails_startup() {
        let mut session = scripted("{\"ok\":true}\n");
        assert!(session.await_ready().await.is_err());
    }
}

use std::{net::SocketAddr, path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const LINE_TIMEOUT: Duration = Duration::from_secs(3);

type StdoutLines = Lines<BufReader<ChildStdout>>;

#[tokio::test]
async fn two_clients_chat_through_the_binary() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat-relay");

    let (relay, addr) = Relay::start(&binary).await?;
    let mut alice = ChatClient::start(&binary, "alice", addr).await?;
    let mut bob = ChatClient::start(&binary, "bob", addr).await?;

    alice.expect("🔵 bob joined the chat.").await?;

    alice.say("Hello from Alice").await?;
    bob.expect("alice: Hello from Alice").await?;
    bob.say("Hi Alice!").await?;
    alice.expect("bob: Hi Alice!").await?;

    bob.say("quit").await?;
    bob.expect("Goodbye!").await?;
    bob.expect("*** server closed the connection").await?;
    alice.expect("🔴 bob left the chat.").await?;

    alice.say("/quit").await?;
    alice.expect("Goodbye!").await?;

    alice.exits_cleanly().await?;
    bob.exits_cleanly().await?;
    relay.stop().await;
    Ok(())
}

struct Relay {
    child: Child,
    logs: tokio::task::JoinHandle<()>,
}

impl Relay {
    /// Starts `serve` on an ephemeral port and reads the bound address from
    /// the listen banner.
    async fn start(binary: &Path) -> Result<(Self, SocketAddr)> {
        let mut child = Command::new(binary)
            .args(["serve", "--host", "127.0.0.1", "--port", "0"])
            .env("RUST_LOG", "info")
            .env("NO_COLOR", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("spawn relay")?;
        let mut lines = BufReader::new(child.stdout.take().context("relay stdout")?).lines();

        let banner = next_line(&mut lines).await?.context("relay printed no banner")?;
        let addr: SocketAddr = banner
            .rsplit_once(' ')
            .map(|(_, addr)| addr)
            .context("banner has no address")?
            .parse()
            .with_context(|| format!("unparseable banner: {banner}"))?;

        // Keep reading so the relay never blocks on a full pipe.
        let logs = tokio::spawn(async move {
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        Ok((Self { child, logs }, addr))
    }

    async fn stop(mut self) {
        let _ = self.child.kill().await;
        let _ = self.logs.await;
    }
}

struct ChatClient {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: StdoutLines,
}

impl ChatClient {
    async fn start(binary: &Path, name: &str, addr: SocketAddr) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(["client", "--username", name, "--server", &addr.to_string()])
            .env("RUST_LOG", "off")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn client {name}"))?;

        let mut client = Self {
            name: name.to_string(),
            stdin: child.stdin.take().context("client stdin")?,
            stdout: BufReader::new(child.stdout.take().context("client stdout")?).lines(),
            child,
        };
        client.expect("Connected to the server!").await?;
        Ok(client)
    }

    async fn say(&mut self, text: &str) -> Result<()> {
        self.stdin.write_all(format!("{text}\n").as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn expect(&mut self, want: &str) -> Result<()> {
        match next_line(&mut self.stdout).await? {
            Some(line) if line == want => Ok(()),
            Some(line) => bail!("{} expected {want:?}, got {line:?}", self.name),
            None => bail!("{} stdout closed while expecting {want:?}", self.name),
        }
    }

    async fn exits_cleanly(mut self) -> Result<()> {
        let status = timeout(LINE_TIMEOUT, self.child.wait())
            .await
            .with_context(|| format!("{} did not exit", self.name))??;
        if !status.success() {
            bail!("{} exited with {status}", self.name);
        }
        Ok(())
    }
}

async fn next_line(lines: &mut StdoutLines) -> Result<Option<String>> {
    let line = timeout(LINE_TIMEOUT, lines.next_line())
        .await
        .context("timed out waiting for output")??;
    Ok(line)
}

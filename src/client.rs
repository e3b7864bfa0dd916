use std::net::SocketAddr;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    event::{read_event, write_event, Envelope},
};

/// A client's handle on one open relay connection.
///
/// Constructed explicitly and passed to whatever needs to send or receive
/// events; opened at startup, closed at shutdown. There is no implicit
/// global instance.
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    /// Dial the relay server.
    pub async fn open(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send one event to the server.
    pub async fn send(&mut self, event: &Envelope) -> io::Result<()> {
        write_event(&mut self.writer, event).await
    }

    /// Receive the next relayed event; `None` once the server closes.
    pub async fn recv(&mut self) -> io::Result<Option<Envelope>> {
        read_event(&mut self.reader).await
    }

    /// Close the connection, flushing the outbound half.
    pub async fn close(mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }

    /// Split into halves for callers multiplexing server events against
    /// another input source.
    pub fn into_split(self) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        (self.reader, self.writer)
    }
}

/// Interactive terminal client: announces entry, publishes stdin lines, and
/// renders relayed events until `/quit` or disconnect.
pub async fn run(args: ClientArgs) -> Result<()> {
    let mut connection = Connection::open(args.server).await?;
    info!("connected to {}", args.server);

    connection
        .send(&Envelope::Enter(json!({ "name": args.name })))
        .await?;
    write_stdout(&format!("*** connected as {}", args.name)).await?;

    let (reader, mut writer) = connection.into_split();

    // Server events render on their own task: read_line is not cancel-safe,
    // so racing it against stdin would drop the bytes of a partially-read
    // event whenever a keystroke interleaves.
    let mut render_task = tokio::spawn(async move {
        let mut reader = reader;
        render_loop(&mut reader).await
    });

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            render_result = &mut render_task => {
                render_result??;
                break;
            }
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, &args.name, &mut writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    render_task.abort();
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }

    Ok(())
}

async fn render_loop(reader: &mut BufReader<OwnedReadHalf>) -> Result<()> {
    while let Some(event) = read_event(reader).await? {
        render_event(event).await?;
    }
    write_stdout("*** server closed the connection").await?;
    Ok(())
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    name: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_event(writer, &Envelope::Exit(json!({ "name": name }))).await?;
        write_stdout("*** leaving room").await?;
        return Ok(false);
    }

    if let Some(uid) = text.strip_prefix("/delete ") {
        write_event(writer, &Envelope::Delete(uid.trim().to_string())).await?;
        return Ok(true);
    }

    write_event(
        writer,
        &Envelope::Publish(json!({ "name": name, "text": text })),
    )
    .await?;
    Ok(true)
}

async fn render_event(event: Envelope) -> io::Result<()> {
    match event {
        Envelope::Enter(data) => {
            write_stdout(&format!("*** {} entered the room", field(&data, "name"))).await
        }
        Envelope::Exit(data) => {
            write_stdout(&format!("*** {} left the room", field(&data, "name"))).await
        }
        Envelope::Publish(data) => {
            write_stdout(&format!(
                "<{}> {}",
                field(&data, "name"),
                field(&data, "text")
            ))
            .await
        }
        Envelope::Delete(uid) => write_stdout(&format!("*** message {uid} deleted")).await,
        Envelope::Update(data) => {
            write_stdout(&format!("*** message {} updated", field(&data, "uid"))).await
        }
    }
}

/// Best-effort field access on an opaque payload; falls back to compact JSON
/// when the shape is not the conventional one.
fn field(data: &Value, key: &str) -> String {
    match data.get(key).and_then(Value::as_str) {
        Some(value) => value.to_string(),
        None => data.to_string(),
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// One relayed message: an event name paired with its payload.
///
/// Payloads are opaque JSON values the relay forwards untouched, with one
/// exception: `deleteEvent` carries a bare message identifier rather than a
/// structured object. That asymmetry is part of the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum Envelope {
    #[serde(rename = "enterEvent")]
    Enter(Value),
    #[serde(rename = "exitEvent")]
    Exit(Value),
    #[serde(rename = "publishEvent")]
    Publish(Value),
    #[serde(rename = "deleteEvent")]
    Delete(String),
    #[serde(rename = "updateEvent")]
    Update(Value),
}

/// Which connections a fan-out targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every connection except the one that sent the event.
    Others,
    /// Every connection, sender included.
    All,
}

impl Envelope {
    /// Fan-out target set for this event. Room entry and exit go to everyone
    /// else; publish, delete, and update echo back to the sender too.
    pub fn scope(&self) -> Scope {
        match self {
            Envelope::Enter(_) | Envelope::Exit(_) => Scope::Others,
            Envelope::Publish(_) | Envelope::Delete(_) | Envelope::Update(_) => Scope::All,
        }
    }

    /// Wire name of the event, exactly as it appears in the `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            Envelope::Enter(_) => "enterEvent",
            Envelope::Exit(_) => "exitEvent",
            Envelope::Publish(_) => "publishEvent",
            Envelope::Delete(_) => "deleteEvent",
            Envelope::Update(_) => "updateEvent",
        }
    }
}

pub async fn read_event<R>(reader: &mut R) -> io::Result<Option<Envelope>>
where
    R: AsyncBufRead + Unpin,
{
    // Simple line-oriented framing keeps interoperability with netcat-style tools.
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_event<W>(writer: &mut W, event: &Envelope) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Encode to JSON once, append a newline delimiter, and flush so peers get timely updates.
    let mut encoded = serde_json::to_vec(event).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! `unixctl`-style command socket: a `UnixListener` accepting one
//! newline-terminated command per connection, dispatched the way
//! `holo-routing`'s ibus command handlers are dispatched, but over a local
//! socket rather than an internal bus.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UnixctlCommand {
    Exit { restart: bool },
    ConnectionStatus,
    GroupTableList,
    MeterTableList,
    CtZoneList,
    InjectPkt(String),
    Recompute,
}

impl UnixctlCommand {
    fn parse(line: &str) -> Result<UnixctlCommand, String> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("exit") => Ok(UnixctlCommand::Exit {
                restart: parts.next() == Some("--restart"),
            }),
            Some("connection-status") => Ok(UnixctlCommand::ConnectionStatus),
            Some("group-table-list") => Ok(UnixctlCommand::GroupTableList),
            Some("meter-table-list") => Ok(UnixctlCommand::MeterTableList),
            Some("ct-zone-list") => Ok(UnixctlCommand::CtZoneList),
            Some("inject-pkt") => parts
                .next()
                .map(|pkt| UnixctlCommand::InjectPkt(pkt.to_owned()))
                .ok_or_else(|| "inject-pkt requires a packet argument".to_owned()),
            Some("recompute") => Ok(UnixctlCommand::Recompute),
            Some(other) => Err(format!("unknown command: {other}")),
            None => Err("empty command".to_owned()),
        }
    }
}

/// Binds the unixctl socket, removing a stale one left behind by an
/// unclean shutdown.
pub fn bind(path: &str) -> std::io::Result<UnixListener> {
    if Path::new(path).exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

/// Accepts and parses one command off the listener, replying with either
/// the command (for the caller to act on) or a parse error written back to
/// the client directly.
pub async fn accept_command(listener: &UnixListener) -> Option<(UnixctlCommand, UnixStream)> {
    let (stream, _) = listener.accept().await.ok()?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let mut stream = reader.into_inner();
    match UnixctlCommand::parse(line.trim()) {
        Ok(cmd) => Some((cmd, stream)),
        Err(err) => {
            let _ = stream.write_all(format!("error: {err}\n").as_bytes()).await;
            None
        }
    }
}

pub async fn reply(stream: &mut UnixStream, text: &str) {
    let _ = stream.write_all(text.as_bytes()).await;
    let _ = stream.write_all(b"\n").await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exit_with_restart_flag() {
        assert_eq!(
            UnixctlCommand::parse("exit --restart").unwrap(),
            UnixctlCommand::Exit { restart: true }
        );
        assert_eq!(
            UnixctlCommand::parse("exit").unwrap(),
            UnixctlCommand::Exit { restart: false }
        );
    }

    #[test]
    fn parses_inject_pkt_argument() {
        assert_eq!(
            UnixctlCommand::parse("inject-pkt eth0:deadbeef").unwrap(),
            UnixctlCommand::InjectPkt("eth0:deadbeef".to_owned())
        );
        assert!(UnixctlCommand::parse("inject-pkt").is_err());
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(UnixctlCommand::parse("frobnicate").is_err());
    }
}

//! Command line arguments and share links.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use p2pburger_protocol::RoomId;

/// Path segment that precedes the room id in a share link.
const ROOM_PATH: &str = "/room/";

#[derive(Parser, Debug)]
#[command(name = "p2pburger")]
#[command(about = "Send one file directly to another peer", long_about = None)]
pub struct Cli {
    /// WebSocket URL of the relay server.
    #[arg(long, env = "P2PBURGER_RELAY", default_value = "ws://127.0.0.1:8080")]
    pub relay: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Offer a file in a new room and print its share link.
    Send {
        file: PathBuf,

        /// MIME type announced to the receiver.
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
    },
    /// Join a room by id or share link and save the file into `dir`.
    Receive {
        room: String,

        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

/// Builds the link a receiver opens for `room`, on the relay's host.
pub fn share_link(relay: &str, room: &RoomId) -> String {
    let (scheme, rest) = match relay.split_once("://") {
        Some(("wss", rest)) => ("https", rest),
        Some((_, rest)) => ("http", rest),
        None => ("http", relay),
    };
    let host = rest.split('/').next().unwrap_or(rest);
    format!("{scheme}://{host}{ROOM_PATH}{room}")
}

/// Accepts a bare room id or a share link.
pub fn parse_room(input: &str) -> Result<RoomId, p2pburger_protocol::ProtocolError> {
    let input = input.trim();
    let id = match input.rfind(ROOM_PATH) {
        Some(at) => {
            let tail = &input[at + ROOM_PATH.len()..];
            tail.split(['/', '?', '#']).next().unwrap_or(tail)
        }
        None => input,
    };
    RoomId::parse(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_uses_relay_host() {
        let room = RoomId::parse("k3x9q2a").unwrap();
        assert_eq!(
            share_link("ws://127.0.0.1:8080", &room),
            "http://127.0.0.1:8080/room/k3x9q2a"
        );
        assert_eq!(
            share_link("wss://burger.example/ws", &room),
            "https://burger.example/room/k3x9q2a"
        );
    }

    #[test]
    fn room_from_link_or_id() {
        assert_eq!(parse_room("k3x9q2a").unwrap().as_str(), "k3x9q2a");
        assert_eq!(
            parse_room("http://127.0.0.1:8080/room/k3x9q2a").unwrap().as_str(),
            "k3x9q2a"
        );
        assert_eq!(
            parse_room("https://burger.example/room/k3x9q2a/?utm=x").unwrap().as_str(),
            "k3x9q2a"
        );
        assert!(parse_room("https://burger.example/room/").is_err());
    }

    #[test]
    fn link_round_trips() {
        let room = RoomId::parse("grill-42").unwrap();
        let link = share_link("ws://relay.local:9000", &room);
        assert_eq!(parse_room(&link).unwrap(), room);
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["p2pburger", "send", "menu.pdf", "--mime", "application/pdf"])
            .unwrap();
        assert_eq!(cli.relay, "ws://127.0.0.1:8080");
        match cli.command {
            Command::Send { file, mime } => {
                assert_eq!(file, PathBuf::from("menu.pdf"));
                assert_eq!(mime, "application/pdf");
            }
            other => panic!("expected send, got {other:?}"),
        }

        let cli = Cli::try_parse_from([
            "p2pburger",
            "--relay",
            "ws://10.0.0.5:8080",
            "receive",
            "k3x9q2a",
        ])
        .unwrap();
        assert_eq!(cli.relay, "ws://10.0.0.5:8080");
        assert!(matches!(cli.command, Command::Receive { ref dir, .. } if dir == &PathBuf::from(".")));
    }
}

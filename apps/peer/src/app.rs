//! Runs one send or receive session and reports its status lines.

use anyhow::bail;
use p2pburger_peer::{Intent, PeerSession, SessionOutcome, TransportFactory, WebRtcFactory};
use tokio::sync::mpsc;

use crate::cli::{Cli, Command, parse_room, share_link};

/// Runs the command with transports from [`WebRtcFactory`].
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let factory = WebRtcFactory::new()?;
    let outcome = run_with(&cli.relay, cli.command, factory, |line| println!("{line}")).await?;
    match outcome {
        SessionOutcome::Sent { bytes } => {
            tracing::info!(bytes, "transfer finished");
            Ok(())
        }
        SessionOutcome::Received(path) => {
            println!("Saved to {}", path.display());
            Ok(())
        }
        SessionOutcome::Closed => bail!("session closed before the transfer finished"),
        SessionOutcome::Failed(reason) => bail!(reason),
    }
}

/// Runs `command` against the relay at `relay`. Every line for the user,
/// including the share link of a new room, goes to `print`.
pub async fn run_with<F, P>(
    relay: &str,
    command: Command,
    factory: F,
    mut print: P,
) -> anyhow::Result<SessionOutcome>
where
    F: TransportFactory + 'static,
    P: FnMut(&str),
{
    let intent = match command {
        Command::Send { file, mime } => {
            if !file.is_file() {
                bail!("{} is not a readable file", file.display());
            }
            Intent::Send {
                path: file,
                mime_type: mime,
            }
        }
        Command::Receive { room, dir } => {
            let room = parse_room(&room)?;
            std::fs::create_dir_all(&dir)?;
            Intent::Receive {
                room,
                save_dir: dir,
            }
        }
    };
    let sending = matches!(intent, Intent::Send { .. });

    let (session, mut status) = PeerSession::connect(relay, intent, factory).await?;
    if sending {
        print(&format!("Room: {}", session.room()));
        print(&format!("Share this link: {}", share_link(relay, session.room())));
    }

    let mut task = tokio::spawn(session.run());
    let outcome = loop {
        tokio::select! {
            Some(line) = status.recv() => print(&line),
            result = &mut task => break result??,
        }
    };
    drain(&mut status, &mut print);
    Ok(outcome)
}

fn drain<P: FnMut(&str)>(status: &mut mpsc::UnboundedReceiver<String>, print: &mut P) {
    while let Ok(line) = status.try_recv() {
        print(&line);
    }
}

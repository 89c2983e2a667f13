use std::io::BufRead;

use tokio::sync::mpsc;
use tutorcall_appcore::CallHandle;
use tutorcall_core::{CallState, CharacterId};
use tutorcall_engine::traits::HangupNavigator;
use tutorcall_engine::{CallCommand, CallEvent};

pub struct PrintNavigator;

impl HangupNavigator for PrintNavigator {
    fn after_hangup(&self, character: CharacterId) {
        println!("Call ended. Continue in text chat: /student/chat/{character}");
    }
}

fn state_hint(state: CallState) -> &'static str {
    match state {
        CallState::Connecting => "connecting...",
        CallState::Listening => "listening, go ahead",
        CallState::Processing => "thinking...",
        CallState::Speaking => "tutor is speaking (talk to interrupt)",
        CallState::Muted => "muted (m to unmute)",
        CallState::Ended => "ended",
    }
}

fn print_event(event: CallEvent) {
    match event {
        CallEvent::StateChanged { to, .. } => println!("[{}] {}", to.label(), state_hint(to)),
        CallEvent::CharacterLoaded(d) => match d.category_name {
            Some(cat) => println!("Talking to {} ({cat})", d.name),
            None => println!("Talking to {}", d.name),
        },
        CallEvent::Transcript(text) => println!("you: {text}"),
        CallEvent::AssistantText(text) => println!("tutor: {text}"),
        CallEvent::Level { average_energy, voice } => {
            log::trace!("level {average_energy:.1} voice={voice}");
        }
        CallEvent::Error(msg) => eprintln!("error: {msg}"),
    }
}

/// Blocking stdin lives on its own thread so it never holds up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("tutorcall-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("stdin: {e}");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("could not read keyboard input: {e}");
    }
    rx
}

/// Runs the interactive call until hang-up or end of input.
pub async fn drive(handle: CallHandle) -> anyhow::Result<()> {
    let CallHandle {
        commands,
        mut events,
        mut task,
    } = handle;

    let mut lines = spawn_stdin_reader();
    let mut stdin_open = true;

    let session = loop {
        tokio::select! {
            done = &mut task => break done?,

            Some(event) = events.recv() => print_event(event),

            line = lines.recv(), if stdin_open => {
                let cmd = match line {
                    Some(l) => match l.trim() {
                        "m" | "mute" => Some(CallCommand::ToggleMute),
                        "q" | "quit" | "hangup" => Some(CallCommand::HangUp),
                        "" => None,
                        other => {
                            println!("unknown input {other:?}; m = mute, q = hang up");
                            None
                        }
                    },
                    None => {
                        stdin_open = false;
                        Some(CallCommand::HangUp)
                    }
                };
                if let Some(cmd) = cmd {
                    let _ = commands.send(cmd).await;
                }
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        print_event(event);
    }
    log::info!(
        "call {} with {} finished in state {}",
        session.id,
        session.character.display_name(),
        session.state.label()
    );
    Ok(())
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tutorcall_core::{CallSession, ChannelStatus, CharacterDetails, InboundMessage};

use crate::engine::CallEngine;
use crate::playback::PlaybackId;
use crate::traits::CharacterLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    ToggleMute,
    SetMuted(bool),
    HangUp,
}

/// Event sources the call loop multiplexes.
pub struct CallIo {
    pub inbound: mpsc::Receiver<InboundMessage>,
    pub status: watch::Receiver<ChannelStatus>,
    pub playback_done: mpsc::UnboundedReceiver<PlaybackId>,
    pub commands: mpsc::Receiver<CallCommand>,
}

type LookupTask = JoinHandle<anyhow::Result<CharacterDetails>>;

async fn join_lookup(task: &mut Option<LookupTask>) -> Result<anyhow::Result<CharacterDetails>, JoinError> {
    match task {
        Some(t) => t.await,
        None => std::future::pending().await,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

/// Runs one call until hang-up. Closing the command channel counts as hang-up.
pub async fn run_call(
    mut engine: CallEngine,
    mut io: CallIo,
    lookup: Option<Arc<dyn CharacterLookup>>,
    tick_interval: Duration,
) -> CallSession {
    let started = Instant::now();
    let character = engine.session().character.id;

    let mut lookup_task = lookup.map(|l| tokio::spawn(async move { l.details(character).await }));

    let initial = *io.status.borrow_and_update();
    engine.on_channel_status(initial, elapsed_ms(started)).await;

    let mut ticker = tokio::time::interval(tick_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut inbound_open = true;
    let mut status_open = true;
    let mut playback_open = true;

    while !engine.is_ended() {
        tokio::select! {
            _ = ticker.tick() => {
                engine.on_tick(elapsed_ms(started)).await;
            }

            cmd = io.commands.recv() => {
                let now = elapsed_ms(started);
                match cmd {
                    Some(CallCommand::ToggleMute) => engine.toggle_mute(now).await,
                    Some(CallCommand::SetMuted(m)) => engine.set_muted(m, now).await,
                    Some(CallCommand::HangUp) | None => engine.hang_up(now).await,
                }
            }

            msg = io.inbound.recv(), if inbound_open => {
                match msg {
                    Some(m) => engine.on_inbound(m, elapsed_ms(started)).await,
                    None => inbound_open = false,
                }
            }

            changed = io.status.changed(), if status_open => {
                if changed.is_err() {
                    status_open = false;
                    continue;
                }
                let status = *io.status.borrow_and_update();
                engine.on_channel_status(status, elapsed_ms(started)).await;
            }

            done = io.playback_done.recv(), if playback_open => {
                match done {
                    Some(id) => engine.on_playback_finished(id, elapsed_ms(started)).await,
                    None => playback_open = false,
                }
            }

            res = join_lookup(&mut lookup_task), if lookup_task.is_some() => {
                lookup_task = None;
                match res {
                    Ok(Ok(details)) => engine.set_character_details(details),
                    Ok(Err(e)) => log::warn!("character lookup failed: {e:#}"),
                    Err(e) => log::warn!("character lookup task failed: {e}"),
                }
            }
        }
    }

    if let Some(task) = lookup_task {
        task.abort();
    }
    engine.into_session()
}

//! Session workers: a fixed pool, each driving one attached client's
//! protocol state machine end-to-end — login, game lifecycle, reveal
//! propagation, win detection, leaderboard queries.

use std::sync::Arc;

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::auth::AuthStatus;
use crate::game::{Board, FlagToggle, Reveal};
use crate::params::*;
use crate::protocol::{read_raw_frame, write_frame, Frame};
use crate::server::timer::{SharedWriter, TimerMode};
use crate::server::ServerState;

/// One worker: pull a waiting client, greet it, run the session, clean
/// up, repeat forever.
pub async fn worker_loop(idx: usize, state: Arc<ServerState>) {
    loop {
        let stream = acquire_client(&state).await;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());
        let (mut reader, writer) = stream.into_split();
        let writer: SharedWriter = Arc::new(Mutex::new(writer));

        state.timers.lock().await.attach(idx, writer.clone());

        if send(&writer, &Frame::Con).await.is_ok() {
            tracing::info!(worker = idx, "client attached: {}", peer);
            let mut session = Session::new(idx);
            session.run(&mut reader, &writer, &state).await;
            session.release(&state).await;
        }

        state.timers.lock().await.detach(idx);
        tracing::info!(worker = idx, "client disconnected");
    }
}

/// Pop the next waiting client, parking on the listener's signal (with
/// a fallback re-check) instead of sleep-polling an empty queue.
async fn acquire_client(state: &ServerState) -> TcpStream {
    loop {
        if let Some(stream) = state.queue.lock().await.pop() {
            return stream;
        }
        let _ = tokio::time::timeout(POP_FALLBACK, state.queue_notify.notified()).await;
    }
}

async fn send(writer: &SharedWriter, frame: &Frame) -> std::io::Result<()> {
    let mut w = writer.lock().await;
    write_frame(&mut *w, frame).await
}

// ─── Session State Machine ──────────────────────────────────────────

struct Session {
    idx: usize,
    /// Reserved credential row and its username, once logged in.
    auth: Option<(usize, String)>,
    playing: bool,
    board: Board,
}

impl Session {
    fn new(idx: usize) -> Self {
        Session {
            idx,
            auth: None,
            playing: false,
            board: Board::new(),
        }
    }

    /// Message loop: runs until the client drops or a send fails.
    async fn run(&mut self, reader: &mut OwnedReadHalf, writer: &SharedWriter, state: &ServerState) {
        loop {
            let raw = match read_raw_frame(reader).await {
                Ok(raw) => raw,
                Err(_) => break,
            };
            let frame = match Frame::decode(&raw) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(worker = self.idx, "undecodable message ({}): {}", e, hex::encode(&raw[..8]));
                    continue;
                }
            };
            if self.handle(frame, writer, state).await.is_err() {
                break;
            }
        }
    }

    async fn handle(
        &mut self,
        frame: Frame,
        writer: &SharedWriter,
        state: &ServerState,
    ) -> std::io::Result<()> {
        match frame {
            Frame::Login { username, password } if self.auth.is_none() => {
                match state.credentials.check(&username, &password).await {
                    AuthStatus::Fail => send(writer, &Frame::Nop).await?,
                    AuthStatus::Used => send(writer, &Frame::Used).await?,
                    AuthStatus::Succ { id } => {
                        self.auth = Some((id, username));
                        send(writer, &Frame::Acc).await?;
                    }
                }
            }

            Frame::Start if self.authed() && !self.playing => {
                tracing::info!(worker = self.idx, "new game for {}", self.username());
                self.board.start(state.placer.place());
                state.timers.lock().await.set_mode(self.idx, TimerMode::On);
                self.playing = true;
                send(writer, &Frame::Go).await?;
                state.leaderboard.lock().await.touch_play(self.username());
            }

            Frame::Stop if self.playing => {
                tracing::info!(worker = self.idx, "game abandoned by {}", self.username());
                self.end_game(state).await;
            }

            Frame::Reveal { cell } if self.playing => match self.board.reveal(cell) {
                Reveal::Hit => {
                    tracing::info!(worker = self.idx, "{} hit a mine", self.username());
                    send(writer, &Frame::Mine).await?;
                    self.end_game(state).await;
                }
                Reveal::Revealed => {
                    send(writer, &Frame::Adj { map: *self.board.map() }).await?;
                }
                Reveal::Blocked => {}
            },

            Frame::Flag { cell } if self.playing => match self.board.toggle_flag(cell) {
                FlagToggle::Mine { mines_left: 0 } => {
                    self.record_win(state).await;
                    send(writer, &Frame::Left { mines: 0 }).await?;
                    self.board.reset();
                    self.playing = false;
                }
                FlagToggle::Mine { mines_left } => {
                    tracing::debug!(worker = self.idx, "mines left: {}", mines_left);
                    send(writer, &Frame::Left { mines: mines_left }).await?;
                }
                FlagToggle::Plain => {
                    send(writer, &Frame::Left { mines: self.board.mines_left() }).await?;
                }
                FlagToggle::Ignored => {}
            },

            Frame::LeadPage { page } if self.authed() => {
                // project the page under the lock, send after releasing it
                let rows = state.leaderboard.lock().await.page(page);
                match rows {
                    Some(rows) => send(writer, &Frame::LeadRows { rows }).await?,
                    None => send(writer, &Frame::LeadEnd).await?,
                }
            }

            other => {
                tracing::warn!(
                    worker = self.idx,
                    "message {} ignored in state auth={} playing={}",
                    tag_name(&other),
                    self.authed(),
                    self.playing,
                );
            }
        }
        Ok(())
    }

    /// Win finalization. The slot goes read-write locked so the poller
    /// leaves the samples alone while the elapsed time is folded into
    /// the leaderboard. This is the one place the timer lock nests
    /// inside the leaderboard lock, in that order only; neither is
    /// held across a send.
    async fn record_win(&mut self, state: &ServerState) {
        let mut leaderboard = state.leaderboard.lock().await;
        let dt = {
            let mut timers = state.timers.lock().await;
            timers.set_mode(self.idx, TimerMode::Rw);
            timers.elapsed(self.idx)
        };
        leaderboard.record_win(self.username(), dt);
        drop(leaderboard);
        state.timers.lock().await.set_mode(self.idx, TimerMode::Off);
        tracing::info!(
            worker = self.idx,
            "{} won in {}.{:03}s",
            self.username(),
            dt.as_secs(),
            dt.subsec_millis(),
        );
    }

    /// Shared cleanup for STOP and mine hits.
    async fn end_game(&mut self, state: &ServerState) {
        self.board.reset();
        state.timers.lock().await.set_mode(self.idx, TimerMode::Off);
        self.playing = false;
    }

    fn authed(&self) -> bool {
        self.auth.is_some()
    }

    fn username(&self) -> &str {
        self.auth.as_ref().map(|(_, name)| name.as_str()).unwrap_or("")
    }

    /// Hand the credential row back on the way out. Runs on every exit
    /// path of the worker loop, including send failures.
    async fn release(&mut self, state: &ServerState) {
        if let Some((id, _)) = self.auth.take() {
            state.credentials.release(id).await;
        }
    }
}

fn tag_name(frame: &Frame) -> &'static str {
    match frame {
        Frame::Login { .. } => "LOGIN",
        Frame::Acc => "ACC",
        Frame::Nop => "NOP",
        Frame::Used => "USED",
        Frame::Con => "CON",
        Frame::Queue { .. } => "QUEUE",
        Frame::Time { .. } => "TIME",
        Frame::Start => "START",
        Frame::Go => "GO",
        Frame::Stop => "STOP",
        Frame::Flag { .. } => "FLAG",
        Frame::Reveal { .. } => "REV",
        Frame::Left { .. } => "LEFT",
        Frame::Mine => "MINE",
        Frame::Adj { .. } => "ADJ",
        Frame::LeadPage { .. } => "LEAD_P",
        Frame::LeadRows { .. } => "LEAD_R",
        Frame::LeadEnd => "LEAD_E",
        Frame::Full => "FULL",
    }
}

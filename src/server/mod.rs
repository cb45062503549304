//! Server: listener, shared state, and the ordered SIGINT teardown.
//!
//! Thirteen long-lived tasks: one listener, one queue poller, one time
//! poller, and ten session workers, all sharing one `ServerState`.

pub mod queue;
pub mod session;
pub mod timer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};

use crate::auth::CredentialStore;
use crate::game::MinePlacer;
use crate::leaderboard::Leaderboard;
use crate::params::*;
use crate::protocol::{write_frame, Frame};
use queue::AdmissionQueue;
use timer::TimerGrid;

pub struct ServerConfig {
    pub port: u16,
    pub auth_file: String,
    pub seed: Option<u64>,
}

/// Shared aggregates, one mutex per resource. Critical sections stay
/// minimal; no lock is held across a send except the queue poller's
/// in-place eviction scan.
pub struct ServerState {
    pub queue: Mutex<AdmissionQueue>,
    pub queue_notify: Notify,
    pub credentials: CredentialStore,
    pub leaderboard: Mutex<Leaderboard>,
    pub timers: Mutex<TimerGrid>,
    pub placer: MinePlacer,
}

impl ServerState {
    pub fn new(credentials: CredentialStore, seed: Option<u64>) -> Arc<Self> {
        Arc::new(ServerState {
            queue: Mutex::new(AdmissionQueue::new()),
            queue_notify: Notify::new(),
            credentials,
            leaderboard: Mutex::new(Leaderboard::new()),
            timers: Mutex::new(TimerGrid::new()),
            placer: MinePlacer::new(seed),
        })
    }
}

/// Bind, spawn the pollers and the worker pool, then accept forever.
/// Returns only on a bind/listen failure; SIGINT exits the process
/// from the shutdown watcher.
pub async fn run_server(cfg: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let credentials = match CredentialStore::load(&cfg.auth_file) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("unable to open {}: {} — all logins will fail", cfg.auth_file, e);
            CredentialStore::empty()
        }
    };
    if credentials.is_empty() {
        tracing::warn!("credential store has no usable rows — every login will fail");
    } else {
        tracing::info!("{} credential rows loaded", credentials.len());
    }
    if cfg.seed.is_some() {
        tracing::warn!("fixed mine layout enabled (seed {:?})", cfg.seed);
    }

    let state = ServerState::new(credentials, cfg.seed);
    let listener = TcpListener::bind((std::net::Ipv4Addr::UNSPECIFIED, cfg.port)).await?;
    tracing::info!("🚀 listening on port {}", cfg.port);

    let time_poller = tokio::spawn(timer::time_poller(state.clone()));
    let workers: Vec<_> = (0..NUM_WORKERS)
        .map(|i| {
            tracing::info!("client worker created ({}/{})", i + 1, NUM_WORKERS);
            tokio::spawn(session::worker_loop(i, state.clone()))
        })
        .collect();
    let queue_poller = tokio::spawn(queue::queue_poller(state.clone()));

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    // Shutdown watcher: time poller first, then workers and their
    // sockets, then the waiting sockets, then the queue poller.
    {
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                if !stop.load(Ordering::Relaxed) {
                    continue;
                }
                tracing::info!("🛑 shutting down");
                time_poller.abort();
                for w in &workers {
                    w.abort();
                }
                // aborted workers drop their sockets; timer slots hold
                // the last write-half references
                state.timers.lock().await.detach_all();
                let waiting = state.queue.lock().await.drain();
                if waiting > 0 {
                    tracing::info!("dropped {} waiting clients", waiting);
                }
                queue_poller.abort();
                tracing::info!("server stopped");
                std::process::exit(0);
            }
        });
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::info!("client connected: {}", addr);
                let pushed = state.queue.lock().await.push(stream);
                match pushed {
                    Ok(()) => state.queue_notify.notify_one(),
                    Err(mut stream) => {
                        tracing::warn!("admission queue full, turning {} away", addr);
                        let _ = write_frame(&mut stream, &Frame::Full).await;
                    }
                }
            }
            Err(e) => tracing::warn!("client connection attempted, but failed: {}", e),
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_raw_frame;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn test_state(tag: &str, seed: Option<u64>) -> Arc<ServerState> {
        let dir = std::env::temp_dir().join(format!("sweepnet-server-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("Authentication-{}.txt", tag));
        std::fs::write(&path, "Username Password\nalice password\nbob hunter2\n").unwrap();
        ServerState::new(CredentialStore::load(&path).unwrap(), seed)
    }

    /// Open a real socket pair and hand the server end to the queue,
    /// the way the listener does.
    async fn attach(state: &Arc<ServerState>) -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) =
            tokio::join!(TcpStream::connect(addr), async { listener.accept().await.unwrap().0 });
        state.queue.lock().await.push(server).unwrap();
        state.queue_notify.notify_one();
        client.unwrap()
    }

    /// Next frame that is not an unsolicited TIME record.
    async fn next_reply(stream: &mut TcpStream) -> Frame {
        loop {
            let raw = tokio::time::timeout(Duration::from_secs(5), read_raw_frame(stream))
                .await
                .expect("timed out waiting for a frame")
                .expect("connection dropped");
            match Frame::decode(&raw).unwrap() {
                Frame::Time { .. } => continue,
                frame => return frame,
            }
        }
    }

    async fn send(stream: &mut TcpStream, frame: &Frame) {
        write_frame(stream, frame).await.unwrap();
    }

    #[tokio::test]
    async fn test_login_game_win_and_leaderboard() {
        let state = test_state("win", Some(DEFAULT_RANDOM_SEED));
        tokio::spawn(session::worker_loop(0, state.clone()));
        tokio::spawn(timer::time_poller(state.clone()));

        let mut c = attach(&state).await;
        assert_eq!(next_reply(&mut c).await, Frame::Con);

        send(&mut c, &Frame::Login { username: "alice".into(), password: "password".into() }).await;
        assert_eq!(next_reply(&mut c).await, Frame::Acc);

        send(&mut c, &Frame::Start).await;
        assert_eq!(next_reply(&mut c).await, Frame::Go);

        // the fixed seed lets the test know the layout the server drew
        let mines = MinePlacer::new(Some(DEFAULT_RANDOM_SEED)).place();
        let safe = (0..NUM_TILES as u8).find(|c| !mines.contains(c)).unwrap();
        send(&mut c, &Frame::Reveal { cell: safe }).await;
        match next_reply(&mut c).await {
            Frame::Adj { map } => assert!(map[safe as usize] <= 8),
            other => panic!("expected ADJ, got {:?}", other),
        }

        // flag every mine; the counter walks down to the win
        for (i, &m) in mines.iter().enumerate() {
            send(&mut c, &Frame::Flag { cell: m }).await;
            let left = (NUM_MINES - 1 - i) as u8;
            assert_eq!(next_reply(&mut c).await, Frame::Left { mines: left });
        }

        send(&mut c, &Frame::LeadPage { page: 0 }).await;
        match next_reply(&mut c).await {
            Frame::LeadRows { rows } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].username, "alice");
                assert_eq!(rows[0].won, 1);
                assert_eq!(rows[0].played, 1);
            }
            other => panic!("expected LEAD_R, got {:?}", other),
        }

        send(&mut c, &Frame::LeadPage { page: 1 }).await;
        assert_eq!(next_reply(&mut c).await, Frame::LeadEnd);
    }

    #[tokio::test]
    async fn test_failed_and_duplicate_logins() {
        let state = test_state("logins", None);
        tokio::spawn(session::worker_loop(0, state.clone()));
        tokio::spawn(session::worker_loop(1, state.clone()));

        let mut a = attach(&state).await;
        assert_eq!(next_reply(&mut a).await, Frame::Con);
        send(&mut a, &Frame::Login { username: "alice".into(), password: "wrong".into() }).await;
        assert_eq!(next_reply(&mut a).await, Frame::Nop);
        send(&mut a, &Frame::Login { username: "alice".into(), password: "password".into() }).await;
        assert_eq!(next_reply(&mut a).await, Frame::Acc);

        let mut b = attach(&state).await;
        assert_eq!(next_reply(&mut b).await, Frame::Con);
        send(&mut b, &Frame::Login { username: "alice".into(), password: "password".into() }).await;
        assert_eq!(next_reply(&mut b).await, Frame::Used);

        // first session ends; its credential row frees up
        drop(a);
        tokio::time::sleep(Duration::from_millis(200)).await;
        send(&mut b, &Frame::Login { username: "alice".into(), password: "password".into() }).await;
        assert_eq!(next_reply(&mut b).await, Frame::Acc);
    }

    #[tokio::test]
    async fn test_stray_messages_do_not_kill_the_session() {
        let state = test_state("stray", None);
        tokio::spawn(session::worker_loop(0, state.clone()));

        let mut c = attach(&state).await;
        assert_eq!(next_reply(&mut c).await, Frame::Con);

        // unknown tag, then a START before login: both warned and ignored
        let mut junk = [0u8; FRAME_LEN];
        junk[0] = b'z';
        junk[1] = EOT;
        c.write_all(&junk).await.unwrap();
        send(&mut c, &Frame::Start).await;

        send(&mut c, &Frame::Login { username: "bob".into(), password: "hunter2".into() }).await;
        assert_eq!(next_reply(&mut c).await, Frame::Acc);
    }

    #[tokio::test]
    async fn test_queue_positions_broadcast() {
        // no workers running: every client waits and hears its position
        let state = test_state("queue", None);
        tokio::spawn(queue::queue_poller(state.clone()));

        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(attach(&state).await);
        }
        for (i, c) in clients.iter_mut().enumerate() {
            let raw = tokio::time::timeout(Duration::from_secs(5), read_raw_frame(c))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(Frame::decode(&raw).unwrap(), Frame::Queue { position: i as u16 });
        }
    }
}

//! Client: connection retry, the frame reader, and a line-oriented
//! front end. Unsolicited QUEUE and TIME frames interleave freely with
//! replies, so everything received is handled by one reader task while
//! the input loop only ever writes.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use crate::game::{GAME_FLAG, GAME_REVEAL_8, GAME_UNKNOWN};
use crate::params::*;
use crate::protocol::{read_raw_frame, write_frame, Frame, LeadRow};

pub async fn run_client(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let stream = connect_with_retry(port).await?;
    println!("Connected to 127.0.0.1:{}. Waiting for a worker...", port);

    let (reader, mut writer) = stream.into_split();
    // current leaderboard page; the reader walks it back on LEAD_E
    let page = Arc::new(AtomicU16::new(0));
    let read_task = tokio::spawn(read_loop(reader, page.clone()));

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else { continue };
        let frame = match cmd {
            "login" => match (parts.next(), parts.next()) {
                (Some(user), Some(pass)) => Frame::Login {
                    username: user.to_string(),
                    password: pass.to_string(),
                },
                _ => {
                    println!("usage: login <user> <pass>");
                    continue;
                }
            },
            "start" => Frame::Start,
            "stop" => Frame::Stop,
            "rev" | "flag" => {
                let Some(cell) = parse_cell(parts.next(), parts.next()) else {
                    println!("usage: {} <cell 0..80> | {} <row> <col>", cmd, cmd);
                    continue;
                };
                if cmd == "rev" {
                    Frame::Reveal { cell }
                } else {
                    Frame::Flag { cell }
                }
            }
            "lead" => Frame::LeadPage { page: page.load(Ordering::Relaxed) },
            "next" => {
                page.fetch_add(1, Ordering::Relaxed);
                Frame::LeadPage { page: page.load(Ordering::Relaxed) }
            }
            "prev" => {
                let _ = page.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| p.checked_sub(1));
                Frame::LeadPage { page: page.load(Ordering::Relaxed) }
            }
            "help" => {
                print_help();
                continue;
            }
            "quit" | "exit" => break,
            other => {
                println!("unknown command: {} (try `help`)", other);
                continue;
            }
        };
        if write_frame(&mut writer, &frame).await.is_err() {
            println!("Connection lost.");
            break;
        }
    }

    read_task.abort();
    Ok(())
}

/// Dial the server, retrying once a second before giving up.
async fn connect_with_retry(port: u16) -> Result<TcpStream, String> {
    for attempt in 0..=NUM_CONNECT_RETRIES {
        if attempt > 0 {
            println!("[{}/{}] retrying connection", attempt, NUM_CONNECT_RETRIES);
        }
        match TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await {
            Ok(stream) => return Ok(stream),
            Err(_) => tokio::time::sleep(std::time::Duration::from_secs(1)).await,
        }
    }
    Err("server did not respond — are you sure it is listening?".into())
}

/// `rev 40` or `rev 4 4` both address the board centre.
fn parse_cell(a: Option<&str>, b: Option<&str>) -> Option<u8> {
    let cell = match (a?, b) {
        (row, Some(col)) => {
            let (r, c): (usize, usize) = (row.parse().ok()?, col.parse().ok()?);
            if r >= NUM_ROWS || c >= NUM_COLS {
                return None;
            }
            r * NUM_COLS + c
        }
        (cell, None) => cell.parse().ok()?,
    };
    (cell < NUM_TILES).then_some(cell as u8)
}

// ─── Reader ─────────────────────────────────────────────────────────

async fn read_loop(mut reader: OwnedReadHalf, page: Arc<AtomicU16>) {
    // repaint the running clock at most once per elapsed second
    let mut shown_secs: Option<u64> = None;
    loop {
        let raw = match read_raw_frame(&mut reader).await {
            Ok(raw) => raw,
            Err(_) => {
                println!("Server closed the connection.");
                return;
            }
        };
        let frame = match Frame::decode(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("undecodable frame ({})", e);
                continue;
            }
        };
        match frame {
            Frame::Con => println!("A worker picked us up. Log in with `login <user> <pass>`."),
            Frame::Queue { position } => {
                println!("Waiting in queue at position {}.", position as u32 + 1)
            }
            Frame::Acc => println!("Login accepted. `start` begins a game."),
            Frame::Nop => println!("Login rejected."),
            Frame::Used => println!("That account is already in a session."),
            Frame::Go => {
                shown_secs = None;
                println!("Game on. `rev <cell>` reveals, `flag <cell>` flags.");
            }
            Frame::Time { secs, nanos } => {
                if shown_secs != Some(secs) {
                    shown_secs = Some(secs);
                    println!("⏱  {:.1}s", secs as f64 + nanos as f64 / 1e9);
                }
            }
            Frame::Left { mines: 0 } => println!("Mines left: 0 — you won!"),
            Frame::Left { mines } => println!("Mines left: {}", mines),
            Frame::Mine => println!("💥 You hit a mine. `start` tries again."),
            Frame::Adj { map } => render_map(&map),
            Frame::LeadRows { rows } => render_leaderboard(&rows),
            Frame::LeadEnd => {
                println!("No entries on that page.");
                let _ = page.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| p.checked_sub(1));
            }
            Frame::Full => println!("Server is full; try again later."),
            other => tracing::debug!("unexpected frame from server: {:?}", other),
        }
    }
}

fn render_map(map: &[u8; NUM_TILES]) {
    println!("    0 1 2 3 4 5 6 7 8");
    for row in 0..NUM_ROWS {
        let mut line = format!("  {} ", row);
        for col in 0..NUM_COLS {
            let glyph = match map[row * NUM_COLS + col] {
                n if n <= GAME_REVEAL_8 => (b'0' + n) as char,
                GAME_FLAG => 'F',
                GAME_UNKNOWN => '-',
                _ => '*',
            };
            line.push(glyph);
            line.push(' ');
        }
        println!("{}", line);
    }
}

fn render_leaderboard(rows: &[LeadRow]) {
    if rows.is_empty() {
        println!("No champions on this page.");
        return;
    }
    println!("{:<26} {:>10} {:>6} {:>6}", "player", "best", "played", "won");
    // rows arrive worst-to-best; show the best first
    for row in rows.iter().rev() {
        let best = row.secs as f64 + row.nanos as f64 / 1e9;
        println!("{:<26} {:>9.3}s {:>6} {:>6}", row.username, best, row.played, row.won);
    }
}

fn print_help() {
    println!("commands:");
    println!("  login <user> <pass>   authenticate");
    println!("  start / stop          begin or abandon a game");
    println!("  rev <cell>|<r> <c>    reveal a tile (0..80 or row col)");
    println!("  flag <cell>|<r> <c>   toggle a flag");
    println!("  lead / next / prev    browse the leaderboard");
    println!("  quit                  leave");
}

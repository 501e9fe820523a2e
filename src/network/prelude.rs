//! Telnet preludes run before a node is claimed.
//!
//! - **Mailer gate**: fake modem banner; the caller must press ESC twice
//!   within the window. Keeps mail robots dialling the telnet port out of
//!   the BBS.
//! - **ANSI probe**: cursor position report query (`ESC[6n`).
//! - **Matrix menu**: keyed service selection when more than one service is
//!   configured.
//!
//! All reads are bounded. Telnet option negotiation in the input is skipped.
//! A caller that disconnects mid-prelude ends it as a hang-up, not an error.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout};
use tracing::debug;

const IAC: u8 = 255;
const SB: u8 = 250;
const SE: u8 = 240;
const WILL: u8 = 251;
const DONT: u8 = 254;
const ESC: u8 = 0x1b;

/// Hang-up key in the service menu.
const HANG_UP_KEY: char = '!';

pub const MAILER_BANNER: &str = "\r\nCONNECT 33600/ARQ/V34/LAPM/V42BIS\r\n";
const MAILER_PROMPT: &str = "\rPress <ESC> twice for the BBS... ";
const ANSI_QUERY: &[u8] = b"\x1b[6n";

/// Wait for the rest of an escape sequence once ESC has arrived.
const ESCAPE_READ: Duration = Duration::from_millis(250);

/// Longest control sequence skipped in the menu.
const MAX_ESCAPE_LEN: usize = 32;

/// Read budgets for the preludes.
#[derive(Debug, Clone, Copy)]
pub struct PreludeTimings {
    pub mailer_window: Duration,
    pub mailer_read: Duration,
    pub ansi_probe: Duration,
    pub menu_read: Duration,
    pub menu_attempts: u32,
}

impl Default for PreludeTimings {
    fn default() -> Self {
        Self {
            mailer_window: Duration::from_secs(12),
            mailer_read: Duration::from_secs(1),
            ansi_probe: Duration::from_secs(2),
            menu_read: Duration::from_secs(15),
            menu_attempts: 9,
        }
    }
}

/// Result of one bounded key read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Byte(u8),
    Eof,
    TimedOut,
}

/// Read one data byte, skipping telnet commands.
async fn read_data_byte<S>(stream: &mut S) -> io::Result<Option<u8>>
where
    S: AsyncRead + Unpin,
{
    loop {
        let Some(byte) = read_raw(stream).await? else {
            return Ok(None);
        };
        if byte != IAC {
            return Ok(Some(byte));
        }
        let Some(command) = read_raw(stream).await? else {
            return Ok(None);
        };
        match command {
            IAC => return Ok(Some(IAC)),
            WILL..=DONT => {
                if read_raw(stream).await?.is_none() {
                    return Ok(None);
                }
            }
            SB => loop {
                match read_raw(stream).await? {
                    None => return Ok(None),
                    Some(IAC) => match read_raw(stream).await? {
                        None => return Ok(None),
                        Some(SE) => break,
                        Some(_) => {}
                    },
                    Some(_) => {}
                }
            },
            _ => {}
        }
    }
}

async fn read_raw<S>(stream: &mut S) -> io::Result<Option<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1];
    match stream.read(&mut buf).await? {
        0 => Ok(None),
        _ => Ok(Some(buf[0])),
    }
}

/// The peer is gone; treated like end of input.
fn is_hang_up(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

async fn read_key<S>(stream: &mut S, limit: Duration) -> io::Result<Key>
where
    S: AsyncRead + Unpin,
{
    match timeout(limit, read_data_byte(stream)).await {
        Ok(Ok(Some(byte))) => Ok(Key::Byte(byte)),
        Ok(Ok(None)) => Ok(Key::Eof),
        Ok(Err(e)) if is_hang_up(&e) => Ok(Key::Eof),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(Key::TimedOut),
    }
}

/// Write and flush. `Ok(false)` means the caller hung up.
async fn send<S>(stream: &mut S, bytes: &[u8]) -> io::Result<bool>
where
    S: AsyncWrite + Unpin,
{
    let written = match stream.write_all(bytes).await {
        Ok(()) => stream.flush().await,
        Err(e) => Err(e),
    };
    match written {
        Ok(()) => Ok(true),
        Err(e) if is_hang_up(&e) => {
            debug!(error = %e, "caller hung up during prelude");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Consume the remainder of an escape sequence (a late cursor position
/// report, an arrow key). Returns `Key::Eof` if the caller went away.
async fn skip_escape<S>(stream: &mut S) -> io::Result<Key>
where
    S: AsyncRead + Unpin,
{
    match read_key(stream, ESCAPE_READ).await? {
        Key::Byte(b'[') => {
            for _ in 0..MAX_ESCAPE_LEN {
                match read_key(stream, ESCAPE_READ).await? {
                    Key::Byte(byte) if (0x40..=0x7e).contains(&byte) => return Ok(Key::Byte(byte)),
                    Key::Byte(_) => {}
                    other => return Ok(other),
                }
            }
            Ok(Key::TimedOut)
        }
        Key::Byte(b'O') => read_key(stream, ESCAPE_READ).await,
        other => Ok(other),
    }
}

/// Fake modem answer; returns true when the caller pressed ESC twice.
pub async fn mailer_gate<S>(stream: &mut S, timings: &PreludeTimings) -> io::Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = format!("{MAILER_BANNER}{MAILER_PROMPT}");
    if !send(stream, greeting.as_bytes()).await? {
        return Ok(false);
    }

    let deadline = Instant::now() + timings.mailer_window;
    let mut escapes = 0;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("mailer gate window expired");
            return Ok(false);
        }
        match read_key(stream, remaining.min(timings.mailer_read)).await? {
            Key::Byte(ESC) => {
                escapes += 1;
                if escapes >= 2 {
                    return send(stream, b"\r\n").await;
                }
            }
            Key::Byte(_) => {}
            Key::Eof => return Ok(false),
            Key::TimedOut => {
                if !send(stream, MAILER_PROMPT.as_bytes()).await? {
                    return Ok(false);
                }
            }
        }
    }
}

/// Ask the terminal for its cursor position; a well-formed `ESC[r;cR`
/// answer means it understands ANSI.
pub async fn probe_ansi<S>(stream: &mut S, timings: &PreludeTimings) -> io::Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !send(stream, ANSI_QUERY).await? {
        return Ok(false);
    }

    let deadline = Instant::now() + timings.ansi_probe;
    let mut reply = Vec::with_capacity(16);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        match read_key(stream, remaining).await? {
            Key::Byte(b'R') => {
                reply.push(b'R');
                let ansi = is_position_report(&reply);
                debug!(ansi, "terminal answered position query");
                return Ok(ansi);
            }
            Key::Byte(ESC) => {
                reply.clear();
                reply.push(ESC);
            }
            Key::Byte(byte) => {
                if !reply.is_empty() {
                    reply.push(byte);
                }
                if reply.len() > 16 {
                    reply.clear();
                }
            }
            Key::Eof | Key::TimedOut => return Ok(false),
        }
    }
}

fn is_position_report(reply: &[u8]) -> bool {
    let Some(body) = reply
        .strip_prefix(b"\x1b[")
        .and_then(|r| r.strip_suffix(b"R"))
    else {
        return false;
    };
    let mut parts = body.split(|b| *b == b';');
    let valid = |p: Option<&[u8]>| p.is_some_and(|p| !p.is_empty() && p.iter().all(u8::is_ascii_digit));
    valid(parts.next()) && valid(parts.next()) && parts.next().is_none()
}

/// One line of the service menu.
#[derive(Debug, Clone, Copy)]
pub struct MenuEntry<'a> {
    pub key: char,
    pub name: &'a str,
    pub description: &'a str,
    pub require_ansi: bool,
}

/// What the caller picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    /// Index into the entries.
    Selected(usize),
    HangUp,
}

fn render_menu(title: &str, entries: &[MenuEntry<'_>], ansi: bool) -> String {
    let mut out = String::new();
    if ansi {
        out.push_str("\x1b[2J\x1b[H");
    }
    out.push_str("\r\n");
    out.push_str(title);
    out.push_str("\r\n\r\n");
    for entry in entries {
        let key = entry.key.to_ascii_uppercase();
        if ansi {
            out.push_str(&format!(" \x1b[1;36m[{key}]\x1b[0m {}", entry.name));
        } else {
            out.push_str(&format!(" [{key}] {}", entry.name));
        }
        if !entry.description.is_empty() {
            out.push_str(" - ");
            out.push_str(entry.description);
        }
        out.push_str("\r\n");
    }
    out.push_str(&format!("\r\n [{HANG_UP_KEY}] Hang up\r\n\r\nSelect: "));
    out
}

/// Show the service menu and wait for a valid pick.
pub async fn matrix_menu<S>(
    stream: &mut S,
    title: &str,
    entries: &[MenuEntry<'_>],
    ansi: bool,
    timings: &PreludeTimings,
) -> io::Result<MenuChoice>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let menu = render_menu(title, entries, ansi);
    let mut attempts = 0;
    let mut show_menu = true;

    while attempts < timings.menu_attempts {
        if show_menu && !send(stream, menu.as_bytes()).await? {
            return Ok(MenuChoice::HangUp);
        }
        show_menu = true;

        let byte = match read_key(stream, timings.menu_read).await? {
            Key::Byte(byte) => byte,
            Key::Eof => return Ok(MenuChoice::HangUp),
            Key::TimedOut => {
                attempts += 1;
                continue;
            }
        };
        // Line endings and padding from the terminal are not a pick.
        if matches!(byte, b'\r' | b'\n' | 0) {
            show_menu = false;
            continue;
        }
        if byte == ESC {
            if skip_escape(stream).await? == Key::Eof {
                return Ok(MenuChoice::HangUp);
            }
            show_menu = false;
            continue;
        }
        attempts += 1;

        let key = char::from(byte);
        if key == HANG_UP_KEY {
            send(stream, b"\r\nGoodbye.\r\n").await?;
            return Ok(MenuChoice::HangUp);
        }
        let Some(index) = entries
            .iter()
            .position(|e| e.key.eq_ignore_ascii_case(&key))
        else {
            if !send(stream, b"\r\nInvalid selection.\r\n").await? {
                return Ok(MenuChoice::HangUp);
            }
            continue;
        };
        if entries[index].require_ansi && !ansi {
            if !send(stream, b"\r\nThis service requires an ANSI terminal.\r\n").await? {
                return Ok(MenuChoice::HangUp);
            }
            continue;
        }
        if !send(stream, b"\r\n").await? {
            return Ok(MenuChoice::HangUp);
        }
        return Ok(MenuChoice::Selected(index));
    }

    debug!(attempts, "menu attempt budget exhausted");
    Ok(MenuChoice::HangUp)
}

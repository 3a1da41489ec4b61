//! In-process chassis emulator for testing without real hardware.
//!
//! Speaks the line protocol over a real TCP socket: logon and
//! ownership, per-resource reservation, stream creation and deletion,
//! a generic attribute store with echoed replies, and the SYNC
//! sentinel framing for multi-line bursts.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use xena_core::constants::{DEFAULT_PASSWORD, REPLY_OK, REPLY_SYNC, SYNC_COMMAND};
use xena_core::error::Result;

#[derive(Default)]
struct EmuState {
    password: String,
    /// Reservation owner per scope: `""` chassis, `"3"` module, `"3/0"` port.
    reservations: HashMap<String, String>,
    /// Seeded and written attributes, keyed by scope/command/bracket.
    attributes: HashMap<AttrKey, String>,
    /// Stream ids per port scope.
    streams: HashMap<String, BTreeSet<u32>>,
    /// Every command line received, in arrival order.
    log: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AttrKey {
    scope: String,
    command: String,
    bracket: Option<String>,
}

impl AttrKey {
    fn new(scope: &str, command: &str, bracket: Option<&str>) -> Self {
        Self {
            scope: scope.to_string(),
            command: command.to_lowercase(),
            bracket: bracket.map(str::to_string),
        }
    }
}

/// A scripted chassis listening on an ephemeral localhost port.
pub struct ChassisEmulator {
    port: u16,
    state: Arc<Mutex<EmuState>>,
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
}

impl ChassisEmulator {
    /// Bind and start serving connections.
    pub fn spawn() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(Mutex::new(EmuState {
            password: DEFAULT_PASSWORD.to_string(),
            ..EmuState::default()
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_state = Arc::clone(&state);
        let accept_shutdown = Arc::clone(&shutdown);
        let accept_handle = thread::Builder::new()
            .name("chassis-emulator".to_string())
            .spawn(move || {
                while !accept_shutdown.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((conn, peer)) => {
                            debug!(%peer, "emulator connection");
                            let conn_state = Arc::clone(&accept_state);
                            thread::spawn(move || serve_connection(conn, conn_state));
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(_) => break,
                    }
                }
            })?;

        Ok(Self {
            port,
            state,
            shutdown,
            accept_handle: Some(accept_handle),
        })
    }

    pub fn addr(&self) -> String {
        "127.0.0.1".to_string()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Seed an attribute or counter line, e.g.
    /// `set_attribute("3/0", "pr_total", None, "12 960 100 800")`.
    pub fn set_attribute(&self, scope: &str, command: &str, bracket: Option<&str>, value: &str) {
        self.state
            .lock()
            .attributes
            .insert(AttrKey::new(scope, command, bracket), value.to_string());
    }

    /// Mark a resource as reserved by a different user, for conflict
    /// scenarios.
    pub fn reserve_for(&self, scope: &str, owner: &str) {
        self.state
            .lock()
            .reservations
            .insert(scope.to_string(), owner.to_string());
    }

    /// Stream ids currently defined under a port scope.
    pub fn stream_ids(&self, scope: &str) -> Vec<u32> {
        self.state
            .lock()
            .streams
            .get(scope)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Copy of every command line received so far.
    pub fn history(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }
}

impl Drop for ChassisEmulator {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve_connection(conn: TcpStream, state: Arc<Mutex<EmuState>>) {
    let mut writer = match conn.try_clone() {
        Ok(w) => w,
        Err(_) => return,
    };
    let reader = BufReader::new(conn);
    let mut conn_owner: Option<String> = None;
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let replies = handle_line(&mut state.lock(), &mut conn_owner, &line);
        for reply in replies {
            if writer.write_all(reply.as_bytes()).is_err()
                || writer.write_all(b"\n").is_err()
            {
                return;
            }
        }
    }
}

/// Render a reply the way the chassis echoes commands:
/// `<index> <COMMAND> [sub] <value>`.
fn echo(index: &str, command: &str, bracket: Option<&str>, value: &str) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(4);
    if !index.is_empty() {
        parts.push(index);
    }
    let upper = command.to_uppercase();
    parts.push(&upper);
    if let Some(b) = bracket {
        parts.push(b);
    }
    if !value.is_empty() {
        parts.push(value);
    }
    parts.join(" ")
}

fn syntax_error(line: &str) -> Vec<String> {
    vec![format!("#Syntax error in line \"{line}\"")]
}

fn bracket_id(bracket: Option<&str>) -> Option<u32> {
    bracket?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .next()?
        .parse()
        .ok()
}

fn handle_line(state: &mut EmuState, conn_owner: &mut Option<String>, raw: &str) -> Vec<String> {
    let line = raw.trim();
    state.log.push(line.to_string());
    if line.is_empty() {
        return vec![REPLY_OK.to_string()];
    }
    if line == SYNC_COMMAND {
        return vec![REPLY_SYNC.to_string()];
    }
    // A deliberately malformed line, to exercise pointer-line skipping.
    if line == "GARBAGE" {
        return vec![
            "---^".to_string(),
            format!("#Syntax error in line \"{line}\""),
        ];
    }

    let mut tokens: VecDeque<&str> = line.split_whitespace().collect();
    let index = match tokens.front() {
        Some(t) if t.chars().all(|c| c.is_ascii_digit() || c == '/') => {
            let idx = (*t).to_string();
            tokens.pop_front();
            idx
        }
        _ => String::new(),
    };
    let Some(command_raw) = tokens.pop_front() else {
        return syntax_error(line);
    };
    let command = command_raw.to_lowercase();
    let bracket: Option<String> = if tokens.front().is_some_and(|t| t.starts_with('[')) {
        tokens.pop_front().map(str::to_string)
    } else {
        None
    };
    let args: Vec<&str> = tokens.into_iter().collect();
    let is_query = args == ["?"];

    match command.as_str() {
        "c_logon" => {
            let given = args.join(" ").replace('"', "");
            if given == state.password {
                vec![REPLY_OK.to_string()]
            } else {
                vec!["<BADVALUE>".to_string()]
            }
        }
        "c_owner" => {
            *conn_owner = Some(args.join(" ").replace('"', ""));
            vec![REPLY_OK.to_string()]
        }
        "c_down" => vec![REPLY_OK.to_string()],
        "c_reservation" | "m_reservation" | "p_reservation" => {
            handle_reservation(state, conn_owner, &index, &command, is_query, &args)
        }
        "c_reservedby" | "m_reservedby" | "p_reservedby" if is_query => {
            let owner = state.reservations.get(&index).cloned().unwrap_or_default();
            vec![echo(&index, &command, None, &format!("\"{owner}\""))]
        }
        "c_traffic" => {
            let on = args.first().is_some_and(|a| a.eq_ignore_ascii_case("on"));
            let value = if on { "ON" } else { "OFF" };
            for pair in args[1..].chunks(2) {
                if let [module, port] = pair {
                    let scope = format!("{module}/{port}");
                    state
                        .attributes
                        .insert(AttrKey::new(&scope, "p_traffic", None), value.to_string());
                }
            }
            vec![REPLY_OK.to_string()]
        }
        "p_reset" => {
            state.attributes.retain(|k, _| k.scope != index);
            state.streams.remove(&index);
            vec![REPLY_OK.to_string()]
        }
        "ps_create" => match bracket_id(bracket.as_deref()) {
            Some(id) => {
                state.streams.entry(index).or_default().insert(id);
                vec![REPLY_OK.to_string()]
            }
            None => vec!["<BADINDEX>".to_string()],
        },
        "ps_delete" => match bracket_id(bracket.as_deref()) {
            Some(id) => {
                state.streams.entry(index.clone()).or_default().remove(&id);
                let gone = bracket.clone();
                state
                    .attributes
                    .retain(|k, _| !(k.scope == index && k.bracket == gone));
                vec![REPLY_OK.to_string()]
            }
            None => vec!["<BADINDEX>".to_string()],
        },
        "ps_indices" if is_query => {
            let ids: Vec<String> = state
                .streams
                .get(&index)
                .map(|ids| ids.iter().map(u32::to_string).collect())
                .unwrap_or_default();
            vec![echo(&index, &command, None, &ids.join(" "))]
        }
        "pr_tplds" if is_query => {
            let mut tplds: BTreeSet<u32> = BTreeSet::new();
            for (key, value) in &state.attributes {
                if key.scope == index && key.command == "ps_tpldid" {
                    if let Ok(id) = value.trim().parse::<i64>() {
                        if id >= 0 {
                            tplds.insert(id as u32);
                        }
                    }
                }
            }
            let ids: Vec<String> = tplds.iter().map(u32::to_string).collect();
            vec![echo(&index, &command, None, &ids.join(" "))]
        }
        _ if is_query && is_burst_query(&command) => {
            burst_reply(state, &index, &command, bracket.as_deref())
        }
        _ if is_query => {
            let key = AttrKey::new(&index, &command, bracket.as_deref());
            match state.attributes.get(&key) {
                Some(value) => vec![echo(&index, &command, bracket.as_deref(), value)],
                None => match default_value(&command) {
                    Some(value) => vec![echo(&index, &command, bracket.as_deref(), value)],
                    None => syntax_error(line),
                },
            }
        }
        _ => {
            let key = AttrKey::new(&index, &command, bracket.as_deref());
            state.attributes.insert(key, args.join(" "));
            vec![REPLY_OK.to_string()]
        }
    }
}

fn handle_reservation(
    state: &mut EmuState,
    conn_owner: &Option<String>,
    index: &str,
    command: &str,
    is_query: bool,
    args: &[&str],
) -> Vec<String> {
    if is_query {
        let value = match state.reservations.get(index) {
            None => "RELEASED",
            Some(owner) if Some(owner) == conn_owner.as_ref() => "RESERVED_BY_YOU",
            Some(_) => "RESERVED_BY_OTHER",
        };
        return vec![echo(index, command, None, value)];
    }
    let action = args.first().map(|a| a.to_lowercase()).unwrap_or_default();
    match action.as_str() {
        "reserve" => match state.reservations.get(index) {
            Some(owner) if Some(owner) != conn_owner.as_ref() => {
                vec!["<NOTRESERVED>".to_string()]
            }
            _ => {
                let owner = conn_owner.clone().unwrap_or_default();
                state.reservations.insert(index.to_string(), owner);
                vec![REPLY_OK.to_string()]
            }
        },
        "release" | "relinquish" => {
            state.reservations.remove(index);
            vec![REPLY_OK.to_string()]
        }
        _ => vec!["<BADVALUE>".to_string()],
    }
}

/// Commands answered with a burst of attribute lines rather than a
/// single echo.
fn is_burst_query(command: &str) -> bool {
    matches!(
        command,
        "c_info"
            | "c_config"
            | "m_info"
            | "m_config"
            | "p_info"
            | "p_config"
            | "p_fullconfig"
            | "ps_config"
            | "pf_config"
            | "pf_condition"
            | "pm_config"
            | "pl_length"
            | "pc_fullconfig"
            | "pc_info"
    )
}

fn burst_reply(
    state: &EmuState,
    index: &str,
    command: &str,
    bracket: Option<&str>,
) -> Vec<String> {
    let family = match command {
        "c_info" | "c_config" => "c_",
        "m_info" | "m_config" => "m_",
        "p_info" | "p_config" | "p_fullconfig" => "p_",
        "ps_config" => "ps_",
        "pf_config" | "pf_condition" => "pf_",
        "pm_config" => "pm_",
        "pl_length" => "pl_",
        "pc_fullconfig" | "pc_info" => "pc_",
        _ => return Vec::new(),
    };
    let mut lines: Vec<(AttrKey, String)> = state
        .attributes
        .iter()
        .filter(|(key, _)| {
            key.scope == index
                && key.command.starts_with(family)
                && (bracket.is_none() || key.bracket.as_deref() == bracket)
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    lines.sort_by(|a, b| a.0.command.cmp(&b.0.command));
    lines
        .into_iter()
        .map(|(key, value)| echo(index, &key.command, key.bracket.as_deref(), &value))
        .collect()
}

fn default_value(command: &str) -> Option<&'static str> {
    match command {
        "p_receivesync" => Some("IN_SYNC"),
        "p_traffic" => Some("OFF"),
        "ps_tpldid" => Some("-1"),
        "ps_enable" => Some("OFF"),
        _ => None,
    }
}

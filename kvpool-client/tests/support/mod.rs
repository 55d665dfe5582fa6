//! In-process RESP2 store for integration tests.
//!
//! Speaks enough of the protocol for the pooled client: AUTH, SELECT,
//! CLIENT SETNAME, QUIT, PING, GET, SET [EX], DEL, EXPIRE, TTL and INFO.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Shared {
    store: Mutex<HashMap<Vec<u8>, Entry>>,
    log: Mutex<Vec<Vec<Vec<u8>>>>,
    password: Option<Vec<u8>>,
    accepted: AtomicUsize,
    fail_pings: AtomicBool,
    stalled: AtomicBool,
}

/// A listening store; the accept loop stops when this is dropped.
pub struct TestServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> anyhow::Result<Self> {
        Self::spawn(None).await
    }

    /// Requires `AUTH <password>` before any other command.
    pub async fn with_password(password: &str) -> anyhow::Result<Self> {
        Self::spawn(Some(password.as_bytes().to_vec())).await
    }

    async fn spawn(password: Option<Vec<u8>>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            password,
            ..Shared::default()
        });

        let accept_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, shared).await;
                });
            }
        });

        Ok(TestServer { addr, shared, task })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self, credentials: &str) -> String {
        format!("redis://{}{}:{}", credentials, self.host(), self.port())
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Makes every PING answer with an error reply.
    pub fn fail_pings(&self, fail: bool) {
        self.shared.fail_pings.store(fail, Ordering::SeqCst);
    }

    /// While set, commands are logged but never answered.
    pub fn stall(&self, stalled: bool) {
        self.shared.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Reads a key as stored, without any client prefix logic.
    pub fn raw_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let store = self.shared.store.lock().unwrap();
        store.get(key).map(|entry| entry.value.clone())
    }

    /// Every command received whose name matches, in arrival order.
    pub fn commands(&self, name: &[u8]) -> Vec<Vec<Vec<u8>>> {
        let log = self.shared.log.lock().unwrap();
        log.iter()
            .filter(|args| args.first().is_some_and(|cmd| eq_ignore_ascii_case(cmd, name)))
            .cloned()
            .collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(mut stream: TcpStream, shared: Arc<Shared>) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut authed = shared.password.is_none();

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match parse_command(&mut buffer) {
                Ok(Some(args)) => {
                    shared.log.lock().unwrap().push(args.clone());
                    if shared.stalled.load(Ordering::SeqCst) {
                        continue;
                    }
                    let quit = args.first().is_some_and(|cmd| eq_ignore_ascii_case(cmd, b"QUIT"));
                    let response = dispatch_command(&args, &shared, &mut authed);
                    stream.write_all(&response).await?;
                    if quit {
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(()) => {
                    stream.write_all(&resp_error("protocol error")).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

fn parse_command(buffer: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, ()> {
    let mut pos = 0;
    let Some(header) = next_line(buffer, &mut pos) else {
        return Ok(None);
    };
    if header.first() != Some(&b'*') {
        return Err(());
    }
    let count = parse_u64(&header[1..]).map_err(|_| ())? as usize;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(line) = next_line(buffer, &mut pos) else {
            return Ok(None);
        };
        if line.first() != Some(&b'$') {
            return Err(());
        }
        let len = parse_u64(&line[1..]).map_err(|_| ())? as usize;
        if buffer.len() < pos + len + 2 {
            return Ok(None);
        }
        args.push(buffer[pos..pos + len].to_vec());
        pos += len + 2;
    }

    buffer.advance(pos);
    Ok(Some(args))
}

fn next_line(buffer: &[u8], pos: &mut usize) -> Option<Vec<u8>> {
    let rest = &buffer[*pos..];
    let end = rest.windows(2).position(|window| window == b"\r\n")?;
    *pos += end + 2;
    Some(rest[..end].to_vec())
}

fn dispatch_command(args: &[Vec<u8>], shared: &Shared, authed: &mut bool) -> Vec<u8> {
    if args.is_empty() {
        return resp_error("empty command");
    }

    let cmd = &args[0];
    if eq_ignore_ascii_case(cmd, b"AUTH") {
        return handle_auth(args, shared, authed);
    }
    if eq_ignore_ascii_case(cmd, b"QUIT") {
        return resp_simple("OK");
    }
    if !*authed {
        return b"-NOAUTH Authentication required.\r\n".to_vec();
    }
    if eq_ignore_ascii_case(cmd, b"PING") {
        return handle_ping(args, shared);
    }
    if eq_ignore_ascii_case(cmd, b"SELECT") {
        return handle_select(args);
    }
    if eq_ignore_ascii_case(cmd, b"CLIENT") {
        return handle_client(args);
    }

    let mut store = shared.store.lock().unwrap();
    purge_expired(&mut store);
    if eq_ignore_ascii_case(cmd, b"GET") {
        return handle_get(args, &store);
    }
    if eq_ignore_ascii_case(cmd, b"SET") {
        return handle_set(args, &mut store);
    }
    if eq_ignore_ascii_case(cmd, b"DEL") {
        return handle_del(args, &mut store);
    }
    if eq_ignore_ascii_case(cmd, b"EXPIRE") {
        return handle_expire(args, &mut store);
    }
    if eq_ignore_ascii_case(cmd, b"TTL") {
        return handle_ttl(args, &store);
    }
    if eq_ignore_ascii_case(cmd, b"INFO") {
        return resp_bulk(b"role:master\r\nengine:test\r\n");
    }

    resp_error("unknown command")
}

fn handle_auth(args: &[Vec<u8>], shared: &Shared, authed: &mut bool) -> Vec<u8> {
    let supplied = match args.len() {
        2 => &args[1],
        3 => &args[2],
        _ => return resp_error("wrong number of arguments for AUTH"),
    };
    match &shared.password {
        None => resp_error("AUTH called without any password configured"),
        Some(expected) if expected == supplied => {
            *authed = true;
            resp_simple("OK")
        }
        Some(_) => b"-WRONGPASS invalid username-password pair\r\n".to_vec(),
    }
}

fn handle_ping(args: &[Vec<u8>], shared: &Shared) -> Vec<u8> {
    if shared.fail_pings.load(Ordering::SeqCst) {
        return resp_error("ping disabled");
    }
    match args.len() {
        1 => resp_simple("PONG"),
        2 => resp_bulk(&args[1]),
        _ => resp_error("wrong number of arguments for PING"),
    }
}

fn handle_select(args: &[Vec<u8>]) -> Vec<u8> {
    if args.len() != 2 {
        return resp_error("wrong number of arguments for SELECT");
    }
    match parse_u64(&args[1]) {
        Ok(db) if db < 16 => resp_simple("OK"),
        Ok(_) => resp_error("DB index is out of range"),
        Err(resp) => resp,
    }
}

fn handle_client(args: &[Vec<u8>]) -> Vec<u8> {
    if args.len() == 3 && eq_ignore_ascii_case(&args[1], b"SETNAME") {
        if args[2].contains(&b' ') {
            return resp_error("Client names cannot contain spaces");
        }
        return resp_simple("OK");
    }
    resp_error("unsupported CLIENT subcommand")
}

fn handle_get(args: &[Vec<u8>], store: &HashMap<Vec<u8>, Entry>) -> Vec<u8> {
    if args.len() != 2 {
        return resp_error("wrong number of arguments for GET");
    }
    match store.get(&args[1]) {
        Some(entry) => resp_bulk(&entry.value),
        None => resp_null(),
    }
}

fn handle_set(args: &[Vec<u8>], store: &mut HashMap<Vec<u8>, Entry>) -> Vec<u8> {
    let expires_at = match args.len() {
        3 => None,
        5 if eq_ignore_ascii_case(&args[3], b"EX") => match parse_u64(&args[4]) {
            Ok(seconds) => Some(Instant::now() + Duration::from_secs(seconds)),
            Err(resp) => return resp,
        },
        n if n < 3 => return resp_error("wrong number of arguments for SET"),
        _ => return resp_error("unsupported SET options"),
    };

    store.insert(
        args[1].clone(),
        Entry {
            value: args[2].clone(),
            expires_at,
        },
    );
    resp_simple("OK")
}

fn handle_del(args: &[Vec<u8>], store: &mut HashMap<Vec<u8>, Entry>) -> Vec<u8> {
    if args.len() < 2 {
        return resp_error("wrong number of arguments for DEL");
    }
    let removed = args[1..].iter().filter(|key| store.remove(*key).is_some()).count();
    resp_integer(removed as i64)
}

fn handle_expire(args: &[Vec<u8>], store: &mut HashMap<Vec<u8>, Entry>) -> Vec<u8> {
    if args.len() != 3 {
        return resp_error("wrong number of arguments for EXPIRE");
    }
    let seconds = match parse_u64(&args[2]) {
        Ok(value) => value,
        Err(resp) => return resp,
    };
    match store.get_mut(&args[1]) {
        Some(entry) => {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
            resp_integer(1)
        }
        None => resp_integer(0),
    }
}

fn handle_ttl(args: &[Vec<u8>], store: &HashMap<Vec<u8>, Entry>) -> Vec<u8> {
    if args.len() != 2 {
        return resp_error("wrong number of arguments for TTL");
    }
    match store.get(&args[1]) {
        None => resp_integer(-2),
        Some(Entry { expires_at: None, .. }) => resp_integer(-1),
        Some(Entry {
            expires_at: Some(at),
            ..
        }) => {
            // Round up so a fresh `EX 5` reports 5, not 4.
            let remaining = at.saturating_duration_since(Instant::now());
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            resp_integer(secs as i64)
        }
    }
}

fn purge_expired(store: &mut HashMap<Vec<u8>, Entry>) {
    let now = Instant::now();
    store.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
}

fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 6);
    buf.extend_from_slice(b"-ERR ");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_integer(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

fn eq_ignore_ascii_case(a: &[u8], b: &[u8]) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn parse_u64(arg: &[u8]) -> Result<u64, Vec<u8>> {
    if arg.is_empty() || !arg.iter().all(u8::is_ascii_digit) {
        return Err(resp_error("invalid integer"));
    }
    Ok(arg
        .iter()
        .fold(0u64, |acc, &b| acc.saturating_mul(10).saturating_add((b - b'0') as u64)))
}

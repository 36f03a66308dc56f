#![allow(dead_code)]

//! In-process stand-in for the target server: one thread per connection,
//! an in-memory map, and the reply shapes the real server produces.

use bytes::{Bytes, BytesMut};
use respprobe::protocol::*;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

/// How the fake server hands replies to the socket
#[derive(Debug, Clone, Copy)]
pub enum Delivery {
    /// All replies for a read in one write
    Whole,
    /// Replies split into writes of at most this many bytes
    Chunked(usize),
}

/// Start a listener on an ephemeral port; each connection runs `handler`
pub fn spawn_with<F>(handler: F) -> SocketAddr
where
    F: Fn(TcpStream) + Send + Clone + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        for conn in listener.incoming() {
            let stream = match conn {
                Ok(s) => s,
                Err(_) => break,
            };
            let handler = handler.clone();
            thread::spawn(move || handler(stream));
        }
    });
    addr
}

/// A key-value server speaking PING, ECHO, SET, GET, DEL, EXISTS, EXPIRE,
/// TTL and INFO (plus MGET, for array replies)
pub fn spawn_kv(delivery: Delivery) -> SocketAddr {
    spawn_with(move |stream| {
        let mut store = Store::default();
        serve(stream, delivery, |args, out| store.exec(args, out));
    })
}

/// A server that answers every request with the same bytes
pub fn spawn_canned(reply: &'static [u8]) -> SocketAddr {
    spawn_with(move |stream| {
        serve(stream, Delivery::Whole, |_, out| out.extend_from_slice(reply));
    })
}

/// A server that reads one request and hangs up after sending `partial`
pub fn spawn_hangup(partial: &'static [u8]) -> SocketAddr {
    spawn_with(move |mut stream| {
        let mut tmp = [0u8; 1024];
        if stream.read(&mut tmp).is_ok() {
            let _ = stream.write_all(partial);
        }
    })
}

/// A server that answers each request with its own encoding as a bulk reply
pub fn spawn_mirror() -> SocketAddr {
    spawn_with(|stream| {
        serve(stream, Delivery::Whole, |args, out| write_bulk(&encode_command(&args), out));
    })
}

/// A server that accepts and reads requests but never answers
pub fn spawn_silent() -> SocketAddr {
    spawn_with(|mut stream| {
        let mut tmp = [0u8; 1024];
        while let Ok(n) = stream.read(&mut tmp) {
            if n == 0 {
                break;
            }
        }
    })
}

fn serve<F>(mut stream: TcpStream, delivery: Delivery, mut exec: F)
where
    F: FnMut(Vec<Bytes>, &mut BytesMut),
{
    stream.set_nodelay(true).ok();
    let mut rbuf = BytesMut::new();
    let mut tmp = [0u8; 4096];
    let mut reqs = Vec::new();
    loop {
        let n = match stream.read(&mut tmp) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        rbuf.extend_from_slice(&tmp[..n]);
        if parse_requests(&mut rbuf, &mut reqs).is_err() {
            return;
        }
        let mut out = BytesMut::new();
        for args in reqs.drain(..) {
            exec(args, &mut out);
        }
        let written = match delivery {
            Delivery::Whole => stream.write_all(&out),
            Delivery::Chunked(size) => out
                .chunks(size.max(1))
                .try_for_each(|c| stream.write_all(c).and_then(|_| stream.flush())),
        };
        if written.is_err() {
            return;
        }
    }
}

#[derive(Default)]
struct Store {
    map: HashMap<Bytes, (Bytes, Option<Instant>)>,
}

impl Store {
    fn live(&mut self, key: &Bytes) -> Option<&(Bytes, Option<Instant>)> {
        let expired = matches!(self.map.get(key), Some((_, Some(at))) if *at <= Instant::now());
        if expired {
            self.map.remove(key);
        }
        self.map.get(key)
    }

    fn exec(&mut self, args: Vec<Bytes>, out: &mut BytesMut) {
        if args.is_empty() {
            write_error("empty command", out);
            return;
        }
        match Cmd::from_args(args) {
            Cmd::Ping(None) => write_simple("PONG", out),
            Cmd::Ping(Some(msg)) | Cmd::Echo(msg) => write_bulk(&msg, out),
            Cmd::Set(k, v) => {
                self.map.insert(k, (v, None));
                write_simple("OK", out);
            }
            Cmd::Get(k) => match self.live(&k) {
                Some((v, _)) => write_bulk(v, out),
                None => write_null(out),
            },
            Cmd::Del(keys) => {
                let n = keys.iter().filter(|k| self.map.remove(*k).is_some()).count();
                write_integer(n as i64, out);
            }
            Cmd::Exists(keys) => {
                let n = keys.iter().filter(|k| self.live(k).is_some()).count();
                write_integer(n as i64, out);
            }
            Cmd::Expire(k, secs) => {
                let found = self.live(&k).is_some();
                if let Some(entry) = self.map.get_mut(&k) {
                    entry.1 = Some(Instant::now() + Duration::from_secs(secs.max(0) as u64));
                }
                write_integer(found as i64, out);
            }
            Cmd::Ttl(k) => match self.live(&k) {
                None => write_integer(-2, out),
                Some((_, None)) => write_integer(-1, out),
                Some((_, Some(at))) => {
                    let left = at.saturating_duration_since(Instant::now());
                    write_integer(left.as_secs() as i64, out);
                }
            },
            Cmd::Info => write_bulk(format!("keys:{}\n", self.map.len()).as_bytes(), out),
            Cmd::Raw(items) if items[0].eq_ignore_ascii_case(b"MGET") && items.len() >= 2 => {
                write_array_len(items.len() - 1, out);
                for k in &items[1..] {
                    match self.live(k) {
                        Some((v, _)) => write_bulk(v, out),
                        None => write_null(out),
                    }
                }
            }
            Cmd::Raw(items) => {
                let name = String::from_utf8_lossy(&items[0]).to_ascii_uppercase();
                if matches!(name.as_str(), "PING" | "ECHO" | "SET" | "GET" | "DEL" | "EXISTS" | "EXPIRE" | "TTL" | "INFO") {
                    write_error(&format!("wrong number of arguments for '{}'", name), out);
                } else {
                    write_error(&format!("unknown command '{}'", String::from_utf8_lossy(&items[0])), out);
                }
            }
        }
    }
}

/*!
 * Blocking RESP Client
 *
 * One TCP connection, used strictly request/reply. Replies are framed by the
 * protocol itself: the client keeps reading into its buffer until the
 * `ReplyFramer` reports a complete reply, however the bytes were split across
 * reads, and then decodes it once. Bytes past the end of a reply stay
 * buffered for the next call.
 */

use crate::config::ClientConfig;
use crate::error::{ClientError, ProtocolError, Result};
use crate::protocol::{parse_reply, write_command, Cmd, Reply, ReplyFramer};
use bytes::{Bytes, BytesMut};
use log::debug;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Size of each socket read
const READ_BUF: usize = 4096;

/// Result of a TTL command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist (-2)
    Missing,
    /// The key exists without an expiry (-1)
    Persistent,
    /// The key expires after this long
    Expires(Duration),
}

/// A connection to a RESP server
pub struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    rbuf: BytesMut,
    wbuf: BytesMut,
    /// Framing progress on the reply at the front of `rbuf`
    framer: ReplyFramer,
    /// Wire bytes of the most recent reply
    last_raw: Bytes,
}

impl Client {
    /// Connect using `cfg`
    ///
    /// Every address the host resolves to is tried in order; the last
    /// connect error is returned if none accepts.
    pub fn connect(cfg: &ClientConfig) -> Result<Self> {
        let addrs: Vec<SocketAddr> = cfg
            .addr
            .to_socket_addrs()
            .map_err(|e| ClientError::Resolve(format!("{}: {}", cfg.addr, e)))?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            match open_socket(addr, cfg) {
                Ok(stream) => {
                    debug!("connected to {}", addr);
                    return Ok(Self::with_peer(stream, addr));
                }
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(ClientError::Io(e)),
            None => Err(ClientError::Resolve(cfg.addr.clone())),
        }
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(Self::with_peer(stream, peer))
    }

    fn with_peer(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            rbuf: BytesMut::with_capacity(READ_BUF),
            wbuf: BytesMut::new(),
            framer: ReplyFramer::new(),
            last_raw: Bytes::new(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Read timeout in effect on the socket
    pub fn read_timeout(&self) -> Result<Option<Duration>> {
        Ok(self.stream.read_timeout()?)
    }

    /// Write timeout in effect on the socket
    pub fn write_timeout(&self) -> Result<Option<Duration>> {
        Ok(self.stream.write_timeout()?)
    }

    /// Bytes of the last reply exactly as the server sent them
    pub fn last_reply_bytes(&self) -> &[u8] {
        &self.last_raw
    }

    /// Send one command and read its reply
    ///
    /// Error replies from the server come back as `Ok(Reply::Error(_))`.
    /// After an `Err`, the connection may be out of step with the server
    /// and should be dropped.
    pub fn call(&mut self, cmd: &Cmd) -> Result<Reply> {
        cmd.write_to(&mut self.wbuf);
        self.flush()?;
        self.read_reply()
    }

    /// Send raw arguments as one command and read its reply
    pub fn call_args<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Reply> {
        write_command(args, &mut self.wbuf);
        self.flush()?;
        self.read_reply()
    }

    /// Send all commands in one write, then read one reply per command
    pub fn pipeline(&mut self, cmds: &[Cmd]) -> Result<Vec<Reply>> {
        for cmd in cmds {
            cmd.write_to(&mut self.wbuf);
        }
        self.flush()?;
        (0..cmds.len()).map(|_| self.read_reply()).collect()
    }

    fn flush(&mut self) -> Result<()> {
        let len = self.wbuf.len();
        let res = self
            .stream
            .write_all(&self.wbuf)
            .and_then(|_| self.stream.flush());
        self.wbuf.clear();
        match res {
            Ok(()) => {
                debug!("sent {} bytes to {}", len, self.peer);
                Ok(())
            }
            Err(e) => {
                debug!("write of {} bytes to {} failed: {}", len, self.peer, e);
                Err(e.into())
            }
        }
    }

    /// Read until one complete reply is buffered, then decode it
    fn read_reply(&mut self) -> Result<Reply> {
        let mut tmp = [0u8; READ_BUF];
        loop {
            // Frame first so slow replies are not re-parsed after every read
            let framed = match self.framer.advance(&self.rbuf[..]) {
                Ok(framed) => framed,
                Err(e) => {
                    self.framer.reset();
                    return Err(e.into());
                }
            };

            if let Some(len) = framed {
                // Detach exactly this reply; anything after it stays buffered
                let raw = self.rbuf.split_to(len).freeze();
                let reply = match parse_reply(&raw)? {
                    Some((_, reply)) => reply,
                    None => return Err(ProtocolError::Incomplete.into()),
                };
                debug!("received {} byte reply from {}", len, self.peer);
                self.last_raw = raw;
                return Ok(reply);
            }

            match self.stream.read(&mut tmp) {
                // EOF in the middle of a reply
                Ok(0) => return Err(ClientError::ConnectionClosed),
                Ok(n) => self.rbuf.extend_from_slice(&tmp[..n]),
                // Retry reads interrupted by signals
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    //
    // Typed helpers
    //
    // Each one turns error replies into `ClientError::Server` and any other
    // reply shape it does not expect into `ClientError::UnexpectedReply`.
    //

    /// PING, returning the status text (normally "PONG")
    pub fn ping(&mut self) -> Result<String> {
        let cmd = Cmd::Ping(None);
        match self.call(&cmd)? {
            Reply::Simple(s) => Ok(s),
            other => Err(unexpected(&cmd, other)),
        }
    }

    pub fn echo(&mut self, msg: impl AsRef<[u8]>) -> Result<Bytes> {
        let cmd = Cmd::Echo(Bytes::copy_from_slice(msg.as_ref()));
        match self.call(&cmd)? {
            Reply::Bulk(Some(b)) => Ok(b),
            other => Err(unexpected(&cmd, other)),
        }
    }

    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let cmd = Cmd::Set(
            Bytes::copy_from_slice(key.as_ref()),
            Bytes::copy_from_slice(value.as_ref()),
        );
        match self.call(&cmd)? {
            Reply::Simple(s) if s == "OK" => Ok(()),
            other => Err(unexpected(&cmd, other)),
        }
    }

    /// GET, with `None` for a missing key
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let cmd = Cmd::Get(Bytes::copy_from_slice(key.as_ref()));
        match self.call(&cmd)? {
            Reply::Bulk(b) => Ok(b),
            other => Err(unexpected(&cmd, other)),
        }
    }

    /// Number of the given keys that exist
    pub fn exists<K: AsRef<[u8]>>(&mut self, keys: &[K]) -> Result<i64> {
        let cmd = Cmd::Exists(to_bytes(keys));
        match self.call(&cmd)? {
            Reply::Integer(n) => Ok(n),
            other => Err(unexpected(&cmd, other)),
        }
    }

    /// Number of the given keys that were removed
    pub fn del<K: AsRef<[u8]>>(&mut self, keys: &[K]) -> Result<i64> {
        let cmd = Cmd::Del(to_bytes(keys));
        match self.call(&cmd)? {
            Reply::Integer(n) => Ok(n),
            other => Err(unexpected(&cmd, other)),
        }
    }

    /// EXPIRE, returning whether the key existed
    pub fn expire(&mut self, key: impl AsRef<[u8]>, seconds: i64) -> Result<bool> {
        let cmd = Cmd::Expire(Bytes::copy_from_slice(key.as_ref()), seconds);
        match self.call(&cmd)? {
            Reply::Integer(1) => Ok(true),
            Reply::Integer(0) => Ok(false),
            other => Err(unexpected(&cmd, other)),
        }
    }

    pub fn ttl(&mut self, key: impl AsRef<[u8]>) -> Result<Ttl> {
        let cmd = Cmd::Ttl(Bytes::copy_from_slice(key.as_ref()));
        match self.call(&cmd)? {
            Reply::Integer(-2) => Ok(Ttl::Missing),
            Reply::Integer(-1) => Ok(Ttl::Persistent),
            Reply::Integer(n) if n >= 0 => Ok(Ttl::Expires(Duration::from_secs(n as u64))),
            other => Err(unexpected(&cmd, other)),
        }
    }

    /// INFO text, one `field:value` per line
    pub fn info(&mut self) -> Result<String> {
        let cmd = Cmd::Info;
        match self.call(&cmd)? {
            Reply::Bulk(Some(b)) => Ok(String::from_utf8_lossy(&b).into_owned()),
            other => Err(unexpected(&cmd, other)),
        }
    }
}

fn open_socket(addr: SocketAddr, cfg: &ClientConfig) -> std::io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    let target = SockAddr::from(addr);
    // No connect timeout means a plain blocking connect
    match cfg.connect_timeout {
        Some(t) => socket.connect_timeout(&target, t)?,
        None => socket.connect(&target)?,
    }
    // Requests are small and latency bound
    socket.set_nodelay(true)?;
    // None leaves reads and writes blocking indefinitely
    socket.set_read_timeout(cfg.read_timeout)?;
    socket.set_write_timeout(cfg.write_timeout)?;
    Ok(socket.into())
}

fn to_bytes<K: AsRef<[u8]>>(keys: &[K]) -> Vec<Bytes> {
    keys.iter().map(|k| Bytes::copy_from_slice(k.as_ref())).collect()
}

fn unexpected(cmd: &Cmd, reply: Reply) -> ClientError {
    match reply {
        Reply::Error(msg) => ClientError::Server(msg),
        other => ClientError::UnexpectedReply {
            cmd: cmd.name().into_owned(),
            reply: format!("{:?}", other),
        },
    }
}

//! Minimal RESP2 client codec.
//!
//! Commands go out as arrays of bulk strings; replies are parsed from a
//! buffered byte slice, returning `None` until a whole frame has arrived.

use std::io::Cursor;

use anyhow::{anyhow, bail, Context as _};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Bound on nested arrays in a reply.
const MAX_DEPTH: usize = 16;

/// One RESP2 reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Array(Vec<Frame>),
    /// `$-1` or `*-1`.
    Null,
}

impl Frame {
    /// Text of a simple or bulk string.
    pub fn as_text(&self) -> anyhow::Result<String> {
        match self {
            Frame::Simple(s) => Ok(s.clone()),
            Frame::Bulk(b) => String::from_utf8(b.to_vec()).context("reply is not utf-8"),
            other => Err(anyhow!("expected a string reply, got {other:?}")),
        }
    }

    pub fn as_integer(&self) -> anyhow::Result<i64> {
        match self {
            Frame::Integer(n) => Ok(*n),
            Frame::Bulk(_) | Frame::Simple(_) => self
                .as_text()?
                .parse()
                .context("reply is not an integer"),
            other => Err(anyhow!("expected an integer reply, got {other:?}")),
        }
    }

    pub fn into_array(self) -> anyhow::Result<Vec<Frame>> {
        match self {
            Frame::Array(items) => Ok(items),
            Frame::Null => Ok(Vec::new()),
            other => Err(anyhow!("expected an array reply, got {other:?}")),
        }
    }

    /// Turns an error reply into `Err`.
    pub fn into_result(self) -> anyhow::Result<Frame> {
        match self {
            Frame::Error(e) => Err(anyhow!("server error: {e}")),
            other => Ok(other),
        }
    }
}

/// Appends `args` to `dst` as a command array.
pub fn encode_command(args: &[&str], dst: &mut BytesMut) {
    dst.put_u8(b'*');
    dst.put_slice(args.len().to_string().as_bytes());
    dst.put_slice(b"\r\n");
    for arg in args {
        dst.put_u8(b'$');
        dst.put_slice(arg.len().to_string().as_bytes());
        dst.put_slice(b"\r\n");
        dst.put_slice(arg.as_bytes());
        dst.put_slice(b"\r\n");
    }
}

/// Parses one frame from the start of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` for a complete frame, `Ok(None)`
/// when more bytes are needed, and `Err` for malformed input.
pub fn parse_frame(buf: &[u8]) -> anyhow::Result<Option<(Frame, usize)>> {
    let mut cursor = Cursor::new(buf);
    match parse(&mut cursor, 0)? {
        Some(frame) => {
            let consumed = usize::try_from(cursor.position())?;
            Ok(Some((frame, consumed)))
        }
        None => Ok(None),
    }
}

fn parse(cursor: &mut Cursor<&[u8]>, depth: usize) -> anyhow::Result<Option<Frame>> {
    if !cursor.has_remaining() {
        return Ok(None);
    }
    let prefix = cursor.get_u8();
    let Some(line) = read_line(cursor) else {
        return Ok(None);
    };
    let line = std::str::from_utf8(line).context("reply header is not utf-8")?;

    let frame = match prefix {
        b'+' => Frame::Simple(line.to_string()),
        b'-' => Frame::Error(line.to_string()),
        b':' => Frame::Integer(line.parse().context("bad integer reply")?),
        b'$' => {
            let len: i64 = line.parse().context("bad bulk length")?;
            if len < 0 {
                return Ok(Some(Frame::Null));
            }
            let len = usize::try_from(len)?;
            if cursor.remaining() < len + 2 {
                return Ok(None);
            }
            let start = usize::try_from(cursor.position())?;
            let buf: &[u8] = *cursor.get_ref();
            let data = &buf[start..start + len];
            if &buf[start + len..start + len + 2] != b"\r\n" {
                bail!("bulk string of {len} bytes is not terminated");
            }
            let frame = Frame::Bulk(Bytes::copy_from_slice(data));
            cursor.advance(len + 2);
            frame
        }
        b'*' => {
            let count: i64 = line.parse().context("bad array length")?;
            if count < 0 {
                return Ok(Some(Frame::Null));
            }
            if depth >= MAX_DEPTH {
                bail!("reply nested deeper than {MAX_DEPTH}");
            }
            let count = usize::try_from(count)?;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                match parse(cursor, depth + 1)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            Frame::Array(items)
        }
        other => bail!("unexpected reply prefix {:?}", char::from(other)),
    };
    Ok(Some(frame))
}

/// Reads up to the next `\r\n`, leaving the cursor after it.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Option<&'a [u8]> {
    let buf: &'a [u8] = *cursor.get_ref();
    let start = usize::try_from(cursor.position()).ok()?;
    let end = buf[start..].windows(2).position(|w| w == b"\r\n")? + start;
    cursor.set_position(u64::try_from(end + 2).ok()?);
    Some(&buf[start..end])
}

// ---------------------------------------------------------------------------
// RespConnection
// ---------------------------------------------------------------------------

/// One request/response connection to a server or sentinel.
pub struct RespConnection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl RespConnection {
    /// Connects to `addr`, authenticating first when `auth` is non-empty.
    pub async fn connect(addr: &str, auth: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect {addr}"))?;
        let mut conn = Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(256),
        };
        if !auth.is_empty() {
            conn.command(&["AUTH", auth]).await.context("auth")?;
        }
        Ok(conn)
    }

    /// Sends one command and returns its reply; error replies become `Err`.
    pub async fn command(&mut self, args: &[&str]) -> anyhow::Result<Frame> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        self.read_frame().await?.into_result()
    }

    async fn read_frame(&mut self) -> anyhow::Result<Frame> {
        loop {
            if let Some((frame, consumed)) = parse_frame(&self.read_buf)? {
                self.read_buf.advance(consumed);
                return Ok(frame);
            }
            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                bail!("connection closed by peer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn encodes_command_as_bulk_array() {
        let mut buf = BytesMut::new();
        encode_command(&["SLAVEOF", "NO", "ONE"], &mut buf);
        assert_eq!(&buf[..], b"*3\r\n$7\r\nSLAVEOF\r\n$2\r\nNO\r\n$3\r\nONE\r\n");
    }

    #[test]
    fn parses_scalars_and_nulls() {
        let (frame, n) = parse_frame(b"+OK\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::Simple("OK".to_string()));
        assert_eq!(n, 5);

        let (frame, _) = parse_frame(b":-3\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::Integer(-3));

        let (frame, _) = parse_frame(b"$-1\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::Null);

        let (frame, _) = parse_frame(b"-ERR nope\r\n").unwrap().unwrap();
        assert!(frame.into_result().is_err());
    }

    #[test]
    fn parses_nested_arrays() {
        let input = b"*2\r\n*2\r\n$4\r\nname\r\n$6\r\ndemo-1\r\n:7\r\n";
        let (frame, n) = parse_frame(input).unwrap().unwrap();
        assert_eq!(n, input.len());
        let items = frame.into_array().unwrap();
        assert_eq!(items[1].as_integer().unwrap(), 7);
        let pair = items[0].clone().into_array().unwrap();
        assert_eq!(pair[1].as_text().unwrap(), "demo-1");
    }

    #[test]
    fn incomplete_input_waits_for_more() {
        assert!(parse_frame(b"").unwrap().is_none());
        assert!(parse_frame(b"$5\r\nhel").unwrap().is_none());
        assert!(parse_frame(b"*2\r\n:1\r\n").unwrap().is_none());
        assert!(parse_frame(b"+OK").unwrap().is_none());
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(parse_frame(b"?what\r\n").is_err());
        assert!(parse_frame(b"$3\r\nabcde\r\n").is_err());
        assert!(parse_frame(b":x\r\n").is_err());
    }

    #[tokio::test]
    async fn connection_authenticates_then_round_trips() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = BytesMut::new();
            for reply in [&b"+OK\r\n"[..], &b"$5\r\nhello\r\n"[..]] {
                loop {
                    if let Some((frame, n)) = parse_frame(&buf).unwrap() {
                        buf.advance(n);
                        seen.push(frame);
                        break;
                    }
                    sock.read_buf(&mut buf).await.unwrap();
                }
                sock.write_all(reply).await.unwrap();
            }
            seen
        });

        let mut conn = RespConnection::connect(&addr, "secret").await.unwrap();
        let reply = conn.command(&["ECHO", "hello"]).await.unwrap();
        assert_eq!(reply.as_text().unwrap(), "hello");

        let seen = server.await.unwrap();
        let auth = seen[0].clone().into_array().unwrap();
        assert_eq!(auth[0].as_text().unwrap(), "AUTH");
        assert_eq!(auth[1].as_text().unwrap(), "secret");
    }
}

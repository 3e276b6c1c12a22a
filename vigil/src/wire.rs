// vigil/src/wire.rs
//
// Length-prefixed JSON over TCP — the framing shared by the ingestion
// server, the analysis-collaborator clients, and the remote dispatch sink.
//
// Frame format:
//   [4 bytes little-endian length] [JSON payload]
//
// Control frames (reports, status, analysis calls) are capped at 1 MiB;
// video-upload frames at 64 MiB.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

pub const MAX_CONTROL_FRAME: usize = 1 << 20;
pub const MAX_UPLOAD_FRAME: usize = 64 << 20;

/// Error envelope for the HTTP-style failure path of every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireResult<T> {
    Err(ErrorBody),
    Ok(T),
}

/// Read one frame. `Ok(None)` means the peer closed the connection cleanly
/// between frames.
pub async fn read_frame<R>(r: &mut R, max: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max {
        return Err(Error::Wire(format!("frame too large: {} bytes", len)));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W>(w: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = body.len() as u32;
    w.write_all(&len.to_le_bytes()).await?;
    w.write_all(body).await?;
    w.flush().await?;
    Ok(())
}

pub async fn write_json<W, T>(w: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    write_frame(w, &serde_json::to_vec(value)?).await
}

/// One request/response exchange with a peer. An `{"error": ...}` envelope
/// in the response surfaces as `Error::Remote`.
pub async fn call<Req, Resp>(addr: &str, req: &Req, max_resp: usize) -> Result<Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let mut stream = TcpStream::connect(addr).await?;
    write_json(&mut stream, req).await?;
    let body = read_frame(&mut stream, max_resp)
        .await?
        .ok_or_else(|| Error::Wire(format!("{} closed without responding", addr)))?;
    match serde_json::from_slice::<WireResult<Resp>>(&body)? {
        WireResult::Ok(v) => Ok(v),
        WireResult::Err(e) => Err(Error::Remote(e.error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
        tag: String,
    }

    #[tokio::test]
    async fn frames_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let sent = Ping {
            seq: 7,
            tag: "cam-1".into(),
        };
        write_json(&mut a, &sent).await.unwrap();
        let body = read_frame(&mut b, MAX_CONTROL_FRAME).await.unwrap().unwrap();
        let got: Ping = serde_json::from_slice(&body).unwrap();
        assert_eq!(got, sent);
    }

    #[tokio::test]
    async fn clean_close_reads_as_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b, MAX_CONTROL_FRAME)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let huge = (MAX_CONTROL_FRAME as u32 + 1).to_le_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &huge)
            .await
            .unwrap();
        let err = read_frame(&mut b, MAX_CONTROL_FRAME).await.unwrap_err();
        assert!(err.to_string().contains("frame too large"));
    }
}

use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};

/// Byte counts for a finished splice, per direction.
#[derive(Debug, Clone, Copy)]
pub struct GlueSummary {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Splice two duplex streams together until both directions are drained.
///
/// Each direction is an independent copy loop. When one side reaches EOF,
/// the opposite write half is shut down (half-close) so remaining bytes in
/// the other direction can still drain back. An I/O error on either
/// direction tears down both. Backpressure comes from the awaited writes;
/// bytes are never reordered within a direction.
pub async fn splice<C, U>(client: C, upstream: U) -> io::Result<GlueSummary>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rd, mut client_wr) = io::split(client);
    let (mut upstream_rd, mut upstream_wr) = io::split(upstream);

    let up = async {
        let n = io::copy(&mut client_rd, &mut upstream_wr).await?;
        upstream_wr.shutdown().await?;
        Ok::<u64, io::Error>(n)
    };
    let down = async {
        let n = io::copy(&mut upstream_rd, &mut client_wr).await?;
        client_wr.shutdown().await?;
        Ok::<u64, io::Error>(n)
    };

    let (client_to_upstream, upstream_to_client) = tokio::try_join!(up, down)?;
    Ok(GlueSummary {
        client_to_upstream,
        upstream_to_client,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn forwards_bytes_both_ways_and_half_closes() {
        let (mut client, client_far) = io::duplex(64);
        let (mut upstream, upstream_far) = io::duplex(64);
        let task = tokio::spawn(splice(client_far, upstream_far));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        // Client half-closes: upstream must see EOF while the reverse
        // direction stays open for draining.
        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        upstream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        upstream.write_all(b"late").await.unwrap();
        upstream.shutdown().await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"late");

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.client_to_upstream, 4);
        assert_eq!(summary.upstream_to_client, 9);
    }

    #[tokio::test]
    async fn preserves_order_for_split_writes() {
        let (mut client, client_far) = io::duplex(8);
        let (mut upstream, upstream_far) = io::duplex(8);
        let task = tokio::spawn(splice(client_far, upstream_far));

        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            upstream.read_to_end(&mut out).await.unwrap();
            out
        });

        for chunk in [&b"abc"[..], b"defg", b"hij"] {
            client.write_all(chunk).await.unwrap();
        }
        client.shutdown().await.unwrap();

        assert_eq!(reader.await.unwrap(), b"abcdefghij");
        task.await.unwrap().unwrap();
    }
}

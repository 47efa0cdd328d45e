//! Raw bidirectional relay between two connections.
//!
//! Once a forwarded request has been written to the target, the inbound and
//! outbound connections are joined byte-for-byte. The bridge knows nothing
//! about framing: whatever the target streams back reaches the caller
//! verbatim.

use tokio::io::{split, AsyncWriteExt};

use super::Conn;

/// Which side finished the bridge first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEnd {
    /// `a` reached end-of-stream or failed.
    A,
    /// `b` reached end-of-stream or failed.
    B,
}

/// Copy bytes `a -> b` and `b -> a` until either direction ends, then close
/// both connections.
///
/// Both connections are consumed so each is closed exactly once, on every
/// exit path.
pub async fn bridge<A, B>(a: A, b: B) -> BridgeEnd
where
    A: Conn,
    B: Conn,
{
    let (mut a_read, mut a_write) = split(a);
    let (mut b_read, mut b_write) = split(b);

    let end = tokio::select! {
        res = tokio::io::copy(&mut a_read, &mut b_write) => {
            if let Err(e) = res {
                tracing::debug!(error = %e, "bridge copy a->b ended with error");
            }
            BridgeEnd::A
        }
        res = tokio::io::copy(&mut b_read, &mut a_write) => {
            if let Err(e) = res {
                tracing::debug!(error = %e, "bridge copy b->a ended with error");
            }
            BridgeEnd::B
        }
    };

    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;
    end
}

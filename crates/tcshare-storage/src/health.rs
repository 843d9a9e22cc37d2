//! Object-store reachability check

use opendal::Operator;
use tracing::debug;

use tcshare_core::{TcshareError, TcshareResult};

const CHECK_NAME: &str = ".tcshare-writable";

/// Confirm the operator root accepts writes: store, stat, and delete a tiny
/// marker object. Listing alone passes on read-only credentials.
pub async fn check_writable(op: &Operator) -> TcshareResult<()> {
    let unreachable = |e: opendal::Error| {
        TcshareError::transport(format!("object store check failed: {e}"))
    };

    op.write(CHECK_NAME, vec![0u8]).await.map_err(unreachable)?;
    let meta = op.stat(CHECK_NAME).await.map_err(unreachable)?;
    op.delete(CHECK_NAME).await.map_err(unreachable)?;

    if meta.content_length() != 1 {
        return Err(TcshareError::transport(format!(
            "object store check read back {} bytes",
            meta.content_length()
        )));
    }
    debug!("object store writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_operator_is_writable_and_left_clean() {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        check_writable(&op).await.unwrap();
        assert!(!op.exists(CHECK_NAME).await.unwrap());
    }
}

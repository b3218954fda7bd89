//! Variable-size allgather over loopback TCP.
//!
//! Rank `r` contributes `r + 1` copies of its rank byte; every worker ends
//! up with the same concatenation.
//!
//! ```bash
//! cargo run --example allgather_v
//! ```

use ringcoll::{Communicator, RingConfig, TcpComm, allgather_v};
use std::sync::Arc;

#[tokio::main]
async fn main() -> ringcoll::Result<()> {
    let world_size = 3u32;
    let comms: Vec<Arc<TcpComm>> = TcpComm::bootstrap_local(world_size, RingConfig::from_env())
        .await?
        .into_iter()
        .map(Arc::new)
        .collect();

    let mut handles = Vec::new();
    for comm in &comms {
        let c = Arc::clone(comm);
        handles.push(tokio::spawn(async move {
            let rank = c.rank();
            let local = vec![rank as u8; rank as usize + 1];
            let (out, table) = allgather_v(&*c, &local).await?;
            println!("rank {rank}: offsets {:?} data {out:?}", table.as_slice());
            Ok::<_, ringcoll::RingError>(())
        }));
    }

    for h in handles {
        h.await.map_err(|e| ringcoll::RingError::transport_with_source("worker task", e))??;
    }

    for c in &comms {
        c.close();
    }
    Ok(())
}

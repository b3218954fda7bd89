//! Ring-allreduce across 4 in-process workers.
//!
//! Each worker starts with its own data. After allreduce(Sum), every worker
//! holds the element-wise sum of all inputs.
//!
//! ```bash
//! cargo run --example allreduce
//! ```

use ringcoll::{Communicator, LocalComm, ReduceOp, RingConfig, allreduce_op};
use std::sync::Arc;

#[tokio::main]
async fn main() -> ringcoll::Result<()> {
    let world_size = 4u32;
    let comms: Vec<Arc<LocalComm>> = LocalComm::bootstrap_local(world_size, RingConfig::from_env())?
        .into_iter()
        .map(Arc::new)
        .collect();

    let count = 8usize;

    // rank 0: [0.0, 0.0, ...], rank 1: [1.0, 1.0, ...], etc.
    let mut handles = Vec::new();
    for comm in &comms {
        let c = Arc::clone(comm);
        handles.push(tokio::spawn(async move {
            let rank = c.rank();
            let mut data = vec![rank as f32; count];
            allreduce_op(&*c, &mut data, ReduceOp::Sum).await?;

            // After Sum allreduce: each element = 0 + 1 + 2 + 3 = 6.0
            println!("rank {rank}: {data:?}");
            Ok::<_, ringcoll::RingError>(())
        }));
    }

    for h in handles {
        h.await.map_err(|e| ringcoll::RingError::transport_with_source("worker task", e))??;
    }

    Ok(())
}

use ringcoll::{Communicator, ring_allgather, ring_allreduce, ring_neighbors};

use super::helpers::{rank_bytes, run_collective};

#[tokio::test]
async fn test_two_lanes_run_concurrently() {
    run_collective(5, |comm| async move {
        let rank = comm.rank();
        let world = comm.world();
        let seg = 16;

        let lane0 = ring_neighbors(&*comm, 0).await.unwrap();
        let lane1 = ring_neighbors(&*comm, 1).await.unwrap();

        // Lane 0 gathers with offset 0, lane 1 with offset 2.
        let mut a = vec![0u8; seg * world as usize];
        let own_a = rank as usize;
        a[own_a * seg..(own_a + 1) * seg].copy_from_slice(&rank_bytes(rank, seg));

        let mut b = vec![0u8; seg * world as usize];
        let own_b = ((rank + 2) % world) as usize;
        b[own_b * seg..(own_b + 1) * seg].copy_from_slice(&rank_bytes(rank + 100, seg));

        let (ra, rb) = tokio::join!(
            ring_allgather(&*comm, &mut a, seg, 0, &*lane0.prev, &*lane0.next),
            ring_allgather(&*comm, &mut b, seg, 2, &*lane1.prev, &*lane1.next),
        );
        ra.unwrap();
        rb.unwrap();

        for k in 0..world {
            assert_eq!(
                &a[k as usize * seg..(k as usize + 1) * seg],
                rank_bytes(k, seg).as_slice()
            );
            let owner = (k + world - 2) % world;
            assert_eq!(
                &b[k as usize * seg..(k as usize + 1) * seg],
                rank_bytes(owner + 100, seg).as_slice()
            );
        }
    })
    .await;
}

#[tokio::test]
async fn test_split_allreduce_on_separate_tasks() {
    // Halves of one logical buffer reduced on independent lanes and tasks.
    run_collective(4, |comm| async move {
        let rank = comm.rank() as f32;
        let lo_comm = std::sync::Arc::clone(&comm);
        let hi_comm = std::sync::Arc::clone(&comm);

        let lo = tokio::spawn(async move {
            let n = ring_neighbors(&*lo_comm, 0).await.unwrap();
            let mut half = vec![rank; 50];
            ring_allreduce(&*lo_comm, &mut half, &*n.prev, &*n.next, sum_f32)
                .await
                .map(|_| half)
        });
        let hi = tokio::spawn(async move {
            let n = ring_neighbors(&*hi_comm, 1).await.unwrap();
            let mut half = vec![rank * 2.0; 51];
            ring_allreduce(&*hi_comm, &mut half, &*n.prev, &*n.next, sum_f32)
                .await
                .map(|_| half)
        });

        let lo = lo.await.unwrap().unwrap();
        let hi = hi.await.unwrap().unwrap();
        assert_eq!(lo, vec![6.0; 50]);
        assert_eq!(hi, vec![12.0; 51]);
    })
    .await;
}

fn sum_f32(incoming: &[f32], acc: &mut [f32]) {
    for (a, b) in acc.iter_mut().zip(incoming) {
        *a += b;
    }
}

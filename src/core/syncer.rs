/*!
 * The sync pool
 *
 * A fixed pool of worker threads that batch-transfer regular files to the
 * slave. Submitters drop paths into the current `PostBox`; whichever worker
 * claims it first swaps in a fresh box, closes the claimed one, runs the
 * batched transfer and broadcasts the outcome. Batch boundaries are
 * opportunistic - every submitted path lands in exactly one batch, and each
 * submitter learns the outcome of its own batch.
 */

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::core::postbox::PostBox;
use crate::replica::Replica;

/// How long an idle worker dozes before re-checking for work.
const IDLE_POLL: Duration = Duration::from_millis(500);

struct Shared {
    slave: Arc<dyn Replica>,
    current: Mutex<Arc<PostBox>>,
}

/// Handle to the sync pool.
pub struct Syncer {
    shared: Arc<Shared>,
}

impl Syncer {
    /// Start `sync_jobs` worker threads transferring to `slave`.
    pub fn new(slave: Arc<dyn Replica>, sync_jobs: usize) -> Self {
        let shared = Arc::new(Shared {
            slave,
            current: Mutex::new(Arc::new(PostBox::new())),
        });
        for i in 0..sync_jobs.max(1) {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("syncjob-{}", i))
                .spawn(move || syncjob(shared))
                .expect("failed to spawn sync worker");
        }
        Self { shared }
    }

    /// Submit a path for transfer; the returned box resolves to the
    /// outcome of the batch the path ended up in.
    pub fn add(&self, path: PathBuf) -> Arc<PostBox> {
        loop {
            let pb = self.shared.current.lock().unwrap().clone();
            if pb.append(path.clone()).is_ok() {
                return pb;
            }
            // a worker claimed that box between the lookup and the append;
            // the swap has already installed a fresh one
        }
    }
}

fn syncjob(shared: Arc<Shared>) {
    loop {
        let claimed = {
            let mut current = shared.current.lock().unwrap();
            if current.is_empty() {
                None
            } else {
                Some(std::mem::replace(&mut *current, Arc::new(PostBox::new())))
            }
        };

        let pb = match claimed {
            Some(pb) => pb,
            None => {
                thread::sleep(IDLE_POLL);
                continue;
            }
        };

        pb.close();
        let batch = pb.entries();
        debug!("transferring a batch of {}", batch.len());
        let result = shared.slave.rsync(&batch);
        pb.wakeup(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::MockReplica;
    use std::collections::HashMap;

    #[test]
    fn test_single_submission_observes_outcome() {
        let slave = MockReplica::new();
        let syncer = Syncer::new(Arc::new(slave.clone()), 1);

        let pb = syncer.add(PathBuf::from("./f"));
        assert!(pb.wait());

        let batches = slave.rsync_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![PathBuf::from("./f")]);
    }

    #[test]
    fn test_failure_is_delivered_to_submitter() {
        let slave = MockReplica::new();
        slave.script_rsync(&[false]);
        let syncer = Syncer::new(Arc::new(slave.clone()), 1);

        let pb = syncer.add(PathBuf::from("./f"));
        assert!(!pb.wait());
    }

    #[test]
    fn test_every_path_lands_in_exactly_one_batch() {
        let slave = MockReplica::new();
        let syncer = Arc::new(Syncer::new(Arc::new(slave.clone()), 4));

        let mut handles = Vec::new();
        for i in 0..40 {
            let syncer = syncer.clone();
            handles.push(thread::spawn(move || {
                let path = PathBuf::from(format!("./f{}", i));
                let pb = syncer.add(path);
                pb.wait()
            }));
        }
        for h in handles {
            assert!(h.join().unwrap());
        }

        let mut seen: HashMap<PathBuf, usize> = HashMap::new();
        for batch in slave.rsync_batches() {
            for path in batch {
                *seen.entry(path).or_default() += 1;
            }
        }
        assert_eq!(seen.len(), 40);
        assert!(seen.values().all(|&n| n == 1), "paths batched twice: {:?}", seen);
    }

    #[test]
    fn test_submitters_share_their_batch_result() {
        let slave = MockReplica::new();
        let syncer = Syncer::new(Arc::new(slave.clone()), 1);

        // both submissions race the same claim window; whichever batch each
        // ends up in, its box reports that batch's result
        let pb_a = syncer.add(PathBuf::from("./a"));
        let pb_b = syncer.add(PathBuf::from("./b"));
        assert!(pb_a.wait());
        assert!(pb_b.wait());

        let total: usize = slave.rsync_batches().iter().map(|b| b.len()).sum();
        assert_eq!(total, 2);
    }
}

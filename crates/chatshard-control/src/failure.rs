//! Failure-rate aggregation over (worker, database) pairs.

use uuid::Uuid;

use chatshard_store::DbConnErr;

/// Error count above which a cell, row or column triggers a warning.
pub const FAILURE_RATE_THRESHOLD: u32 = 5;

/// Only connection errors younger than this feed the matrix; older entries
/// are evicted.
pub const FAILURE_RATE_WINDOW_MINUTES: i64 = 30;

/// Dense worker × database matrix of recent connection-error counts.
#[derive(Debug)]
pub struct FailureMatrix {
    workers: Vec<Uuid>,
    dbs: Vec<String>,
    counts: Vec<Vec<u32>>,
}

impl FailureMatrix {
    /// Accumulate the matrix from recent connection errors.
    pub fn build(errors: &[DbConnErr]) -> Self {
        let mut workers: Vec<Uuid> = Vec::new();
        let mut dbs: Vec<String> = Vec::new();

        for err in errors {
            if !workers.contains(&err.worker_id) {
                workers.push(err.worker_id);
            }
            if !dbs.iter().any(|db| db == &err.db_url) {
                dbs.push(err.db_url.clone());
            }
        }

        let mut counts = vec![vec![0u32; dbs.len()]; workers.len()];
        for err in errors {
            let worker_idx = workers.iter().position(|w| *w == err.worker_id).unwrap();
            let db_idx = dbs.iter().position(|db| db == &err.db_url).unwrap();
            counts[worker_idx][db_idx] += 1;
        }

        Self {
            workers,
            dbs,
            counts,
        }
    }

    /// Warnings for every cell, row sum and column sum strictly above the
    /// threshold.
    pub fn warnings(&self, threshold: u32) -> Vec<String> {
        let mut warnings = Vec::new();

        for (i, worker) in self.workers.iter().enumerate() {
            for (j, db) in self.dbs.iter().enumerate() {
                let count = self.counts[i][j];
                if count > threshold {
                    warnings.push(format!("worker {worker} against {db}: {count} errors"));
                }
            }
        }

        for (i, worker) in self.workers.iter().enumerate() {
            let row_sum: u32 = self.counts[i].iter().sum();
            if row_sum > threshold {
                warnings.push(format!("worker {worker} across all databases: {row_sum} errors"));
            }
        }

        for (j, db) in self.dbs.iter().enumerate() {
            let col_sum: u32 = self.counts.iter().map(|row| row[j]).sum();
            if col_sum > threshold {
                warnings.push(format!("database {db} across all workers: {col_sum} errors"));
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn errors_for(worker: Uuid, db: &str, n: usize) -> Vec<DbConnErr> {
        (0..n)
            .map(|i| DbConnErr {
                worker_id: worker,
                db_url: db.to_string(),
                fail_time: Utc::now() - chrono::Duration::seconds(i as i64),
            })
            .collect()
    }

    #[test]
    fn empty_input_yields_no_warnings() {
        let matrix = FailureMatrix::build(&[]);
        assert!(matrix.warnings(FAILURE_RATE_THRESHOLD).is_empty());
    }

    #[test]
    fn threshold_is_exclusive() {
        let worker = Uuid::new_v4();

        // Exactly at the threshold: silent.
        let matrix = FailureMatrix::build(&errors_for(worker, "postgres://u1", 5));
        assert!(matrix.warnings(FAILURE_RATE_THRESHOLD).is_empty());

        // One above: the cell, its row and its column all fire.
        let matrix = FailureMatrix::build(&errors_for(worker, "postgres://u1", 6));
        let warnings = matrix.warnings(FAILURE_RATE_THRESHOLD);
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("6 errors"));
    }

    #[test]
    fn row_sum_fires_without_a_hot_cell() {
        let worker = Uuid::new_v4();
        let mut errors = errors_for(worker, "postgres://u1", 3);
        errors.extend(errors_for(worker, "postgres://u2", 3));

        let warnings = FailureMatrix::build(&errors).warnings(FAILURE_RATE_THRESHOLD);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("across all databases"));
    }

    #[test]
    fn column_sum_fires_across_workers() {
        let mut errors = errors_for(Uuid::new_v4(), "postgres://u1", 3);
        errors.extend(errors_for(Uuid::new_v4(), "postgres://u1", 3));

        let warnings = FailureMatrix::build(&errors).warnings(FAILURE_RATE_THRESHOLD);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("across all workers"));
    }
}

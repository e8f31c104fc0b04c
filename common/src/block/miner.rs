//! Brute-force nonce search over a serialized block header.

use super::{NONCE_OFFSET, TIMESTAMP_OFFSET};
use crate::{
    config::BLOCK_HEADER_SIZE,
    crypto::{hash256, Hash},
};
use log::{info, log_enabled, Level};
use std::{
    cmp::Ordering,
    time::{Duration, Instant},
};
use thiserror::Error;

pub type DigestFn = fn(&[u8]) -> Hash;

pub const DEFAULT_POW_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1_000_000;
// Full u32 nonce space
pub const FULL_NONCE_SPAN: u64 = 1 << 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PowError {
    #[error("Invalid header size: expected {}, got {}", BLOCK_HEADER_SIZE, _0)]
    InvalidHeaderSize(usize),
    #[error("Invalid target size: expected 32, got {}", _0)]
    InvalidTargetSize(usize),
    #[error("Invalid hex input")]
    InvalidHex,
    #[error("Nonce span must be at least 1")]
    EmptyNonceSpan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowSolution {
    // Digest of `header` as last computed
    pub hash: Hash,
    pub header: Vec<u8>,
    pub nonce: u32,
    pub time: u32,
    pub solved: bool,
}

/// Configuration of a proof-of-work search.
///
/// The header's nonce (offset 76) is iterated from `start_nonce`. After
/// `nonce_span` nonces the nonce restarts and the timestamp (offset 68) is
/// incremented. The search ends when a digest compares strictly below the
/// target, or when the timeout or iteration cap is hit.
#[derive(Debug, Clone)]
pub struct ProofOfWorkSolver {
    timeout: Duration,
    progress_interval: u64,
    start_time: Option<u32>,
    start_nonce: u32,
    nonce_span: u64,
    max_iterations: Option<u64>,
    digest: DigestFn,
}

impl Default for ProofOfWorkSolver {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_POW_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            start_time: None,
            start_nonce: 0,
            nonce_span: FULL_NONCE_SPAN,
            max_iterations: None,
            digest: hash256,
        }
    }
}

impl ProofOfWorkSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    pub fn with_start_time(mut self, time: u32) -> Self {
        self.start_time = Some(time);
        self
    }

    pub fn with_start_nonce(mut self, nonce: u32) -> Self {
        self.start_nonce = nonce;
        self
    }

    pub fn with_nonce_span(mut self, span: u64) -> Self {
        self.nonce_span = span;
        self
    }

    pub fn with_max_iterations(mut self, iterations: u64) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    pub fn with_digest(mut self, digest: DigestFn) -> Self {
        self.digest = digest;
        self
    }

    /// Same as [`ProofOfWorkSolver::solve`] with hex encoded header and
    /// target. The target is given in wire byte order.
    pub fn solve_hex(&self, header: &str, target: &str) -> Result<PowSolution, PowError> {
        let header = hex::decode(header).map_err(|_| PowError::InvalidHex)?;
        let target = hex::decode(target).map_err(|_| PowError::InvalidHex)?;
        let target = Hash::from_slice(&target).ok_or(PowError::InvalidTargetSize(target.len()))?;
        self.solve(&header, &target)
    }

    pub fn solve(&self, header: &[u8], target: &Hash) -> Result<PowSolution, PowError> {
        if header.len() != BLOCK_HEADER_SIZE {
            return Err(PowError::InvalidHeaderSize(header.len()));
        }
        if self.nonce_span == 0 {
            return Err(PowError::EmptyNonceSpan);
        }

        let mut buf = header.to_vec();
        let start_time = self
            .start_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp() as u32);
        let mut time = start_time;
        let mut nonce = self.start_nonce;
        set_time(&mut buf, time);

        if log_enabled!(Level::Info) {
            info!(
                "Starting PoW at time={} nonce={} with timeout {:?}, target {}",
                time,
                nonce,
                self.timeout,
                target.to_display_hex()
            );
        }

        let started = Instant::now();
        let mut lowest = Hash::max();
        let mut iterations: u64 = 0;
        let mut since_lowest: u64 = 0;
        let mut in_span: u64 = 0;

        loop {
            set_nonce(&mut buf, nonce);
            let hash = (self.digest)(&buf);
            iterations += 1;
            since_lowest += 1;

            if hash.cmp_reversed(target) == Ordering::Less {
                if log_enabled!(Level::Info) {
                    info!(
                        "Solved PoW with nonce={}, time={} -> {} after {} iterations",
                        nonce,
                        time,
                        hash.to_display_hex(),
                        iterations
                    );
                }
                return Ok(PowSolution {
                    hash,
                    header: buf,
                    nonce,
                    time,
                    solved: true,
                });
            }

            if hash.cmp_reversed(&lowest) == Ordering::Less {
                lowest = hash;
                if log_enabled!(Level::Info) {
                    info!(
                        "Progress after {} iterations: lowest {} [{}]",
                        since_lowest,
                        hash.to_display_hex(),
                        nonce
                    );
                }
                since_lowest = 0;
            }

            if iterations % self.progress_interval == 0 && log_enabled!(Level::Info) {
                let secs = started.elapsed().as_secs_f64().max(f64::EPSILON);
                info!(
                    "{} iterations [{}] -- {:.0} h/s",
                    iterations,
                    nonce,
                    iterations as f64 / secs
                );
            }

            let capped = self.max_iterations.is_some_and(|max| iterations >= max);
            if capped || started.elapsed() >= self.timeout {
                info!("Timed out trying to solve PoW after {} iterations", iterations);
                return Ok(PowSolution {
                    hash,
                    header: buf,
                    nonce,
                    time,
                    solved: false,
                });
            }

            in_span += 1;
            if in_span == self.nonce_span {
                in_span = 0;
                nonce = self.start_nonce;
                time = time.wrapping_add(1);
                set_time(&mut buf, time);
                info!("Iterated over all nonce values, updating time -> {}", time);
            } else {
                nonce = nonce.wrapping_add(1);
            }
        }
    }
}

fn set_nonce(buf: &mut [u8], nonce: u32) {
    buf[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_le_bytes());
}

fn set_time(buf: &mut [u8], time: u32) {
    buf[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4].copy_from_slice(&time.to_le_bytes());
}

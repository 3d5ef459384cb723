//! Out-of-process LZO decoding
//!
//! LZO decoders are GPL licensed, so the codec is not linked in.
//! Decompression is delegated to a helper binary named by the
//! `FOREHAND_LZO_HELPER` environment variable, speaking a tiny pipe
//! protocol: the request is two little-endian u64 words
//! `(target_capacity, compressed_size)` followed by the compressed
//! bytes; the response is an i64 status (negative = error), a u64
//! output size, then the output bytes. One request is in flight per
//! helper, guarded by a per-helper mutex; up to [`MAX_WORKERS`]
//! helpers are spawned lazily.

use std::env;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Mutex, OnceLock};

use tracing::{debug, trace};

use crate::error::{lock_poisoned, ForehandError};

const MAX_WORKERS: usize = 4;

struct Helper {
    child: Option<HelperProcess>,
}

struct HelperProcess {
    _child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

struct HelperPool {
    path: OsString,
    workers: Vec<Mutex<Helper>>,
}

static POOL: OnceLock<Option<HelperPool>> = OnceLock::new();

fn pool() -> Result<&'static HelperPool, ForehandError> {
    let pool = POOL.get_or_init(|| {
        let path = env::var_os("FOREHAND_LZO_HELPER")?;
        let worker_count = std::thread::available_parallelism()
            .map_or(1, |n| n.get())
            .min(MAX_WORKERS);
        let workers = (0..worker_count)
            .map(|_| Mutex::new(Helper { child: None }))
            .collect();
        Some(HelperPool { path, workers })
    });
    pool.as_ref()
        .ok_or(ForehandError::UnsupportedCompression(3))
}

fn spawn(path: &OsString) -> Result<HelperProcess, ForehandError> {
    debug!(?path, "spawning lzo helper");
    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|_| ForehandError::CompressionInit)?;
    let stdin = child.stdin.take().ok_or(ForehandError::CompressionInit)?;
    let stdout = child.stdout.take().ok_or(ForehandError::CompressionInit)?;
    Ok(HelperProcess { _child: child, stdin, stdout })
}

fn request(
    process: &mut HelperProcess,
    bytes: &[u8],
    out: &mut Vec<u8>,
    target_size: usize,
) -> Result<(), ForehandError> {
    process.stdin.write_all(&(target_size as u64).to_le_bytes())?;
    process.stdin.write_all(&(bytes.len() as u64).to_le_bytes())?;
    process.stdin.write_all(bytes)?;
    process.stdin.flush()?;

    let mut word = [0u8; 8];
    process.stdout.read_exact(&mut word)?;
    let remote_rv = i64::from_le_bytes(word);
    if remote_rv < 0 {
        return Err(ForehandError::CompressionDecompress);
    }
    process.stdout.read_exact(&mut word)?;
    let uncompressed_size = u64::from_le_bytes(word);
    if uncompressed_size > target_size as u64 {
        return Err(ForehandError::CompressionDecompress);
    }
    out.resize(uncompressed_size as usize, 0);
    process.stdout.read_exact(out)?;
    Ok(())
}

pub(crate) fn decompress(
    bytes: &[u8],
    out: &mut Vec<u8>,
    target_size: usize,
) -> Result<(), ForehandError> {
    let pool = pool()?;

    // prefer an idle helper, fall back to waiting on the first
    let mut helper = None;
    for worker in &pool.workers {
        if let Ok(guard) = worker.try_lock() {
            helper = Some(guard);
            break;
        }
    }
    let mut helper = match helper {
        Some(helper) => helper,
        None => pool.workers[0].lock().map_err(lock_poisoned)?,
    };

    if helper.child.is_none() {
        helper.child = Some(spawn(&pool.path)?);
    }
    let process = helper.child.as_mut().ok_or(ForehandError::Internal)?;
    trace!(compressed = bytes.len(), target_size, "lzo helper request");
    let result = request(process, bytes, out, target_size);
    if result.is_err() {
        // pipe state is unknown after a failure, restart next time
        helper.child = None;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_helper_is_unsupported() {
        // the variable is unset in the test environment
        if env::var_os("FOREHAND_LZO_HELPER").is_some() {
            return;
        }
        let mut out = Vec::new();
        assert!(matches!(
            decompress(b"\x00", &mut out, 16),
            Err(ForehandError::UnsupportedCompression(3))
        ));
    }
}

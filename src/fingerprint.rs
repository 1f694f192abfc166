//! Invocation fingerprinting (C1).
//!
//! Derives a stable [`PoolId`] from the argv-relevant-subset and classpath
//! content of an invocation, exactly as
//! `examples/original_source/hottub/client/java.c::compute_id` does with
//! MD5. Order of operations matters: changing it changes which invocations
//! share a pool.

use crate::error::{Error, Result};
use hottub_protocol::PoolId;
use md5::{Digest, Md5};
use std::path::Path;

/// Everything `fingerprint` produces from an argv, short of a chosen slot.
#[derive(Debug, Clone)]
pub struct FingerprintResult {
    /// Pool identity with slot left at the placeholder byte.
    pub id: PoolId,
    /// The `-D<key>[=<value>]` style VM options, in original order.
    pub argv_vm_opts: Vec<String>,
    /// Everything after the VM-option block and the argument that ended it
    /// (see below) — the user program and its arguments.
    pub argv_program: Vec<String>,
    /// The resolved classpath value (explicit, env, or default `.`).
    pub classpath: String,
}

/// Compute the pool identity for an invocation.
///
/// `argv_all[0]` is the program name and is not scanned; scanning starts at
/// index 1, matching the original.
pub fn fingerprint(argv_all: &[String]) -> Result<FingerprintResult> {
    let mut hasher = Md5::new();
    let mut argv_vm_opts = Vec::new();
    let mut explicit_classpath: Option<String> = None;
    let mut stop_index = argv_all.len();

    let mut i = 1;
    while i < argv_all.len() {
        let arg = &argv_all[i];

        if arg.len() >= 3 && arg.starts_with("-D") {
            argv_vm_opts.push(arg.clone());
            i += 1;
            continue;
        }

        hasher.update(arg.as_bytes());

        if arg == "-classpath" || arg == "-cp" {
            i += 1;
            if let Some(value) = argv_all.get(i) {
                hasher.update(value.as_bytes());
                explicit_classpath = Some(value.clone());
            }
            i += 1;
            continue;
        }

        if !arg.starts_with('-') {
            // This argument is the last one folded into the digest; the
            // remainder (NOT including this one) is argv_program.
            stop_index = i + 1;
            break;
        }

        i += 1;
    }

    let argv_program = argv_all.get(stop_index..).unwrap_or(&[]).to_vec();

    let classpath = explicit_classpath
        .or_else(|| std::env::var("CLASSPATH").ok())
        .unwrap_or_else(|| ".".to_string());

    hash_classpath(&mut hasher, &classpath)?;

    let digest = hasher.finalize();
    let hex_digest = hex::encode(digest);
    let id = PoolId::from_digest_hex(&hex_digest)
        .ok_or_else(|| Error::Fingerprint("digest did not produce 32 hex bytes".into()))?;

    Ok(FingerprintResult {
        id,
        argv_vm_opts,
        argv_program,
        classpath,
    })
}

/// Feed every colon-separated classpath entry into the digest, per the
/// three cases in spec §4.1 step 4. Non-jar, non-wildcard entries (loose
/// class directories) are silently ignored — reproduced as-is per the
/// open question in spec §9, not a bug we're fixing here.
fn hash_classpath(hasher: &mut Md5, classpath: &str) -> Result<()> {
    for entry in classpath.split(':').filter(|e| !e.is_empty()) {
        if let Some(dir) = entry.strip_suffix("/*").or_else(|| {
            if entry == "*" {
                Some("")
            } else {
                None
            }
        }) {
            let dir = if dir.is_empty() { "." } else { dir };
            if Path::new(dir).is_dir() {
                hash_wildcard_dir(hasher, dir)?;
            }
            // Directory doesn't exist: silently ignored, matching the
            // original's `is_wildcard` existence check.
        } else if entry.ends_with(".jar") {
            hash_file(hasher, Path::new(entry))?;
        }
        // Anything else (a loose class directory) is ignored.
    }
    Ok(())
}

/// Hash every `.jar` file directly inside `dir`, in a stable (sorted) order
/// so that `fingerprint` is deterministic regardless of directory-entry
/// iteration order — required by the determinism law in spec §8, and not a
/// behavior change to *which* bytes get hashed, only a fixed order for them.
fn hash_wildcard_dir(hasher: &mut Md5, dir: &str) -> Result<()> {
    let mut jars: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| Error::Fingerprint(format!("reading {}: {}", dir, e)))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("jar"))
        .collect();
    jars.sort();
    for jar in jars {
        hash_file(hasher, &jar)?;
    }
    Ok(())
}

/// Hash a file's full content into the digest, reproducing the original's
/// fixed-1024-byte-chunk read loop exactly: the same 1024-byte buffer is
/// reused (never cleared) across reads of one file, so on the final, short
/// read the stale tail bytes from the *previous* chunk are folded into the
/// digest along with the genuinely new bytes. This is an acknowledged
/// quirk of the observable identity function (spec §9) and is reproduced
/// deliberately, not accidentally.
fn hash_file(hasher: &mut Md5, path: &Path) -> Result<()> {
    use std::io::Read;

    const CHUNK: usize = 1024;
    let mut file = std::fs::File::open(path)
        .map_err(|e| Error::Fingerprint(format!("opening {}: {}", path.display(), e)))?;
    let mut buf = [0u8; CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::Fingerprint(format!("reading {}: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }
        hasher.update(buf);
    }
    Ok(())
}

//! Commit signature verification over `git verify-commit`.
//!
//! Trusted keys are imported into a scratch GNUPGHOME per verification,
//! and the gpg status output is parsed for `VALIDSIG` records. The
//! quorum is the number of distinct key fingerprints that produced a
//! valid signature. A standard git commit carries a single signature, so
//! quorums above one require commits signed by tooling that attaches
//! additional signatures; the verifier counts whatever gpg reports.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use tempfile::TempDir;
use tracing::debug;
use vaultops_core::source::{SignatureVerifier, SourceError, WorktreeRepo};

use crate::git_cli::git_command;

/// [`SignatureVerifier`] backed by gpg.
#[derive(Debug, Default)]
pub struct GpgVerifier;

impl GpgVerifier {
    /// Creates the verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SignatureVerifier for GpgVerifier {
    fn verify_commit(
        &self,
        repo: &dyn WorktreeRepo,
        hash: &str,
        trusted_keys: &[String],
        required: u32,
    ) -> Result<(), SourceError> {
        if required == 0 {
            return Ok(());
        }
        let Some(workdir) = repo.workdir() else {
            return Err(SourceError::Repo(
                "signature verification needs an on-disk worktree".to_string(),
            ));
        };

        let home = scratch_keyring(trusted_keys)?;

        let mut cmd = git_command(Some(workdir));
        cmd.env("GNUPGHOME", home.path());
        cmd.args(["verify-commit", "--raw", hash]);
        cmd.stdin(Stdio::null());
        let output = cmd.output()?;
        let raw = String::from_utf8_lossy(&output.stderr);

        let valid = count_valid_signatures(&raw);
        debug!(commit = %hash, valid, required, "verified commit signatures");
        if valid >= required as usize {
            Ok(())
        } else {
            Err(SourceError::SignatureRejected {
                hash: hash.to_string(),
                reason: format!("{valid} valid signature(s), {required} required"),
            })
        }
    }
}

/// Builds a scratch GNUPGHOME populated with the trusted keys.
fn scratch_keyring(trusted_keys: &[String]) -> Result<TempDir, SourceError> {
    let home = TempDir::new()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(home.path(), std::fs::Permissions::from_mode(0o700))?;
    }
    for key in trusted_keys {
        import_key(home.path(), key)?;
    }
    Ok(home)
}

fn import_key(home: &Path, key: &str) -> Result<(), SourceError> {
    let mut cmd = std::process::Command::new("gpg");
    cmd.env_clear();
    if let Some(path) = std::env::var_os("PATH") {
        cmd.env("PATH", path);
    }
    cmd.env("GNUPGHOME", home);
    cmd.args(["--batch", "--quiet", "--import"]);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(key.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(SourceError::Repo(format!(
            "importing trusted key: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Counts distinct key fingerprints with a `VALIDSIG` status record.
fn count_valid_signatures(raw: &str) -> usize {
    let mut fingerprints: HashSet<&str> = HashSet::new();
    for line in raw.lines() {
        let mut parts = line.split_whitespace();
        if parts.next() != Some("[GNUPG:]") {
            continue;
        }
        if parts.next() != Some("VALIDSIG") {
            continue;
        }
        if let Some(fingerprint) = parts.next() {
            fingerprints.insert(fingerprint);
        }
    }
    fingerprints.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_VALID: &str = "\
[GNUPG:] NEWSIG
[GNUPG:] SIG_ID abcdef 2026-07-01 1751371200
[GNUPG:] GOODSIG 1234567890ABCDEF Release Key <release@example.com>
[GNUPG:] VALIDSIG 0123456789ABCDEF0123456789ABCDEF01234567 2026-07-01 1751371200 0 4 0 1 10 00 0123456789ABCDEF0123456789ABCDEF01234567
[GNUPG:] TRUST_UNDEFINED 0 pgp
";

    #[test]
    fn test_counts_single_valid_signature() {
        assert_eq!(count_valid_signatures(ONE_VALID), 1);
    }

    #[test]
    fn test_counts_distinct_fingerprints_once() {
        let doubled = format!("{ONE_VALID}{ONE_VALID}");
        assert_eq!(count_valid_signatures(&doubled), 1);
    }

    #[test]
    fn test_counts_two_distinct_signatures() {
        let second = ONE_VALID.replace(
            "0123456789ABCDEF0123456789ABCDEF01234567",
            "89ABCDEF0123456789ABCDEF0123456789ABCDEF",
        );
        let combined = format!("{ONE_VALID}{second}");
        assert_eq!(count_valid_signatures(&combined), 2);
    }

    #[test]
    fn test_bad_signature_counts_nothing() {
        let raw = "\
[GNUPG:] NEWSIG
[GNUPG:] BADSIG 1234567890ABCDEF Release Key <release@example.com>
";
        assert_eq!(count_valid_signatures(raw), 0);
    }

    #[test]
    fn test_unsigned_output_counts_nothing() {
        assert_eq!(count_valid_signatures(""), 0);
        assert_eq!(count_valid_signatures("error: no signature found"), 0);
    }
}

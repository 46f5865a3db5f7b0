//! Signature capability: narrow sign/verify interface over a host-provided
//! `gpg`/`gpgv` binary. The engine never parses OpenPGP packets itself.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{EngineError, Result};

pub trait Signer {
    /// Produce a detached signature over `content`.
    fn sign(&self, content: &[u8]) -> Result<Vec<u8>>;
}

pub trait Verifier {
    /// Verify `signature` over `content` against the keyring at
    /// `keyring_path`. `Ok(())` means valid; any failure is
    /// `EngineError::BadSignature`.
    fn verify(&self, keyring_path: &Path, signature: &[u8], content: &[u8]) -> Result<()>;
}

/// Signs by shelling out to `gpg --detach-sign`, feeding content on stdin
/// and reading the signature from stdout.
pub struct GpgSigner;

impl Signer for GpgSigner {
    fn sign(&self, content: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new("gpg")
            .arg("--detach-sign")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        child.stdin.take().expect("piped stdin").write_all(content)?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(EngineError::BadSignature(format!(
                "gpg --detach-sign exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(output.stdout)
    }
}

/// Verifies by shelling out to `gpgv --keyring <path> <sigfile> -`, piping
/// content on stdin. `gpgv` needs the signature as a file, so the caller
/// passes a path to one (the on-disk `<id>.sig`), not raw bytes.
pub struct GpgvVerifier;

impl GpgvVerifier {
    pub fn verify_file(&self, keyring_path: &Path, sig_path: &Path, content: &[u8]) -> Result<()> {
        let mut child = Command::new("gpgv")
            .arg("--keyring")
            .arg(keyring_path)
            .arg(sig_path)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        child.stdin.take().expect("piped stdin").write_all(content)?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(EngineError::BadSignature(format!(
                "gpgv verification failed: {}",
                String::from_utf8_lossy(&output.stdout)
            )));
        }
        Ok(())
    }
}

impl Verifier for GpgvVerifier {
    fn verify(&self, keyring_path: &Path, signature: &[u8], content: &[u8]) -> Result<()> {
        let sig_path = std::env::temp_dir().join(format!(
            "driftmirror-verify-{}-{}.sig",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ));
        {
            let mut f = std::fs::File::create(&sig_path)?;
            f.write_all(signature)?;
            f.flush()?;
        }
        let result = self.verify_file(keyring_path, &sig_path, content);
        let _ = std::fs::remove_file(&sig_path);
        result
    }
}

/// A verifier useful in tests: asserts the content it's asked to verify
/// matches an expected sequence, without shelling out to a real `gpgv`.
#[cfg(test)]
pub struct ScriptedVerifier {
    pub expected: std::sync::Mutex<std::collections::VecDeque<Vec<u8>>>,
}

#[cfg(test)]
impl Verifier for ScriptedVerifier {
    fn verify(&self, _keyring_path: &Path, _signature: &[u8], content: &[u8]) -> Result<()> {
        let mut expected = self.expected.lock().unwrap();
        match expected.pop_front() {
            Some(want) if want == content => Ok(()),
            Some(_) => Err(EngineError::BadSignature("content did not match expected".into())),
            None => Err(EngineError::BadSignature("no more expected verifications".into())),
        }
    }
}

//! Filter subprocesses: a scoped resource the scanner feeds candidate
//! paths through.
//!
//! The exact filtering semantics are a host extension point (the engine
//! does not interpret a filter's stdout); what the engine guarantees is
//! lifecycle: every configured filter is spawned once per scan and
//! drained on both the success and error paths.

use std::io::Write;
use std::process::{Child, Command, Stdio};

/// One running filter subprocess.
pub struct ProcessFilter {
    child: Child,
    program: String,
}

impl ProcessFilter {
    pub fn spawn(cmdline: &str) -> std::io::Result<Self> {
        let mut parts = cmdline.split_whitespace();
        let program = parts.next().unwrap_or_default().to_string();
        let args: Vec<&str> = parts.collect();
        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        Ok(Self { child, program })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Close stdin, signalling the filter to wind down, and wait for exit.
    fn close(&mut self) {
        if let Some(mut stdin) = self.child.stdin.take() {
            let _ = stdin.write_all(b"");
        }
        let _ = self.child.wait();
    }
}

impl Drop for ProcessFilter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Owns the set of filters configured for one scan.
#[derive(Default)]
pub struct FilterCombiner {
    filters: Vec<ProcessFilter>,
}

impl FilterCombiner {
    pub fn spawn_all(cmdlines: &[String]) -> std::io::Result<Self> {
        let mut filters = Vec::with_capacity(cmdlines.len());
        for cmdline in cmdlines {
            filters.push(ProcessFilter::spawn(cmdline)?);
        }
        Ok(Self { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Drain and close every filter. Called unconditionally when a scan
    /// finishes, success or failure.
    pub fn close_all(&mut self) {
        for filter in &mut self.filters {
            filter.close();
        }
    }
}

impl Drop for FilterCombiner {
    fn drop(&mut self) {
        self.close_all();
    }
}

//! Parsers and writers for the engine's own tiny on-disk config formats:
//! `format`, `set.conf`, `metadata.conf`, `content.conf`.
//!
//! These are not a general-purpose config language; each file has one
//! fixed shape, so hand-rolled line parsing is clearer than pulling in an
//! INI crate for four `key = value` lines.

use crate::error::{EngineError, Result};

pub const LOCAL_FORMAT_MARKER: &str = "1\n";
pub const HTTP_FORMAT_MARKER: &str = "LMirror Smart Server 1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetFormat {
    Local,
    Http,
}

pub fn parse_format(bytes: &[u8]) -> Result<SetFormat> {
    let text = std::str::from_utf8(bytes).map_err(|e| EngineError::BadFormat(e.to_string()))?;
    match text {
        LOCAL_FORMAT_MARKER => Ok(SetFormat::Local),
        HTTP_FORMAT_MARKER => Ok(SetFormat::Http),
        other => Err(EngineError::BadFormat(format!("unrecognised set format marker {other:?}"))),
    }
}

/// `set.conf`: `[set]\ncontent_root = <relpath>\n`
#[derive(Debug, Clone)]
pub struct SetConf {
    pub content_root: String,
}

impl SetConf {
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("[set]\ncontent_root = {}\n", self.content_root).into_bytes()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| EngineError::BadFormat(e.to_string()))?;
        let kv = parse_ini_section(text, "set")?;
        let content_root = kv
            .get("content_root")
            .ok_or_else(|| EngineError::BadFormat("set.conf missing content_root".into()))?
            .clone();
        Ok(Self { content_root })
    }
}

/// `metadata.conf`: `[metadata]\nbasis = N\nlatest = N\ntimestamp = F\nupdating = True|False\n[server = URL]\n`
#[derive(Debug, Clone)]
pub struct MetadataConf {
    pub basis: u64,
    pub latest: u64,
    pub timestamp: f64,
    pub updating: bool,
    pub server: Option<String>,
}

impl MetadataConf {
    pub fn fresh() -> Self {
        Self { basis: 0, latest: 0, timestamp: 0.0, updating: true, server: None }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            "[metadata]\nbasis = {}\nlatest = {}\ntimestamp = {}\nupdating = {}\n",
            self.basis,
            self.latest,
            self.timestamp,
            if self.updating { "True" } else { "False" },
        );
        if let Some(server) = &self.server {
            out.push_str(&format!("server = {server}\n"));
        }
        out.into_bytes()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| EngineError::BadFormat(e.to_string()))?;
        let kv = parse_ini_section(text, "metadata")?;
        let get = |key: &str| -> Result<&String> {
            kv.get(key).ok_or_else(|| EngineError::BadFormat(format!("metadata.conf missing {key}")))
        };
        let basis: u64 = get("basis")?
            .parse()
            .map_err(|_| EngineError::BadFormat("bad basis value".into()))?;
        let latest: u64 = get("latest")?
            .parse()
            .map_err(|_| EngineError::BadFormat("bad latest value".into()))?;
        let timestamp: f64 = get("timestamp")?
            .parse()
            .map_err(|_| EngineError::BadFormat("bad timestamp value".into()))?;
        let updating = match get("updating")?.as_str() {
            "True" => true,
            "False" => false,
            other => return Err(EngineError::BadFormat(format!("bad updating value {other:?}"))),
        };
        let server = kv.get("server").cloned();
        Ok(Self { basis, latest, timestamp, updating, server })
    }
}

/// `content.conf`: one directive per line, `include <regex>` / `exclude
/// <regex>` / `program <cmdline>`, blank lines ignored.
#[derive(Debug, Clone, Default)]
pub struct ContentConf {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub programs: Vec<String>,
}

impl ContentConf {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| EngineError::BadFormat(e.to_string()))?;
        let mut conf = ContentConf::default();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let (directive, rest) = line
                .split_once(' ')
                .ok_or_else(|| EngineError::BadFormat(format!("malformed content.conf line {line:?}")))?;
            match directive {
                "include" => conf.includes.push(rest.to_string()),
                "exclude" => conf.excludes.push(rest.to_string()),
                "program" => conf.programs.push(rest.to_string()),
                other => {
                    return Err(EngineError::BadFormat(format!("unknown content.conf directive {other:?}")))
                },
            }
        }
        Ok(conf)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for include in &self.includes {
            out.push_str("include ");
            out.push_str(include);
            out.push('\n');
        }
        for exclude in &self.excludes {
            out.push_str("exclude ");
            out.push_str(exclude);
            out.push('\n');
        }
        for program in &self.programs {
            out.push_str("program ");
            out.push_str(program);
            out.push('\n');
        }
        out.into_bytes()
    }
}

fn parse_ini_section(text: &str, section: &str) -> Result<std::collections::BTreeMap<String, String>> {
    let mut lines = text.lines();
    let header = lines.next().unwrap_or_default().trim();
    let expected = format!("[{section}]");
    if header != expected {
        return Err(EngineError::BadFormat(format!("expected section {expected:?}, found {header:?}")));
    }
    let mut kv = std::collections::BTreeMap::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| EngineError::BadFormat(format!("malformed config line {line:?}")))?;
        kv.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(kv)
}

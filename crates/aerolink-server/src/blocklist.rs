//! Address blocklist.
//!
//! A deny-list of IP addresses and CIDR prefixes, one rule per line with
//! `#` comments. [`Blocklist::check`] answers "is this address allowed?";
//! [`Blocklist::refresh`] re-reads the file when its modification time
//! changed and reports whether the rule set actually differs, so the
//! router can sweep existing connections only when needed.

use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::SystemTime;

use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    net: IpAddr,
    prefix: u8,
}

impl Rule {
    fn parse(text: &str) -> Option<Rule> {
        let (addr_text, prefix_text) = match text.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (text, None),
        };
        let net: IpAddr = addr_text.parse().ok()?;
        let max_prefix = match net {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix_text {
            Some(p) => p.parse().ok().filter(|&p| p <= max_prefix)?,
            None => max_prefix,
        };
        Some(Rule { net, prefix })
    }

    fn matches(&self, addr: IpAddr) -> bool {
        match (self.net, addr.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                prefix_eq(&net.octets(), &addr.octets(), self.prefix)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                prefix_eq(&net.octets(), &addr.octets(), self.prefix)
            }
            _ => false,
        }
    }
}

fn prefix_eq(a: &[u8], b: &[u8], prefix: u8) -> bool {
    let full = usize::from(prefix / 8);
    if a[..full] != b[..full] {
        return false;
    }
    let rem = prefix % 8;
    if rem == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rem);
    (a[full] & mask) == (b[full] & mask)
}

/// File-backed address deny-list.
#[derive(Debug)]
pub struct Blocklist {
    path: Option<PathBuf>,
    rules: Vec<Rule>,
    last_modified: Option<SystemTime>,
}

impl Blocklist {
    /// Create a blocklist over the given file; `None` disables blocking.
    /// The initial rule set is loaded immediately.
    pub fn new(path: Option<PathBuf>) -> Self {
        let mut list = Self {
            path,
            rules: Vec::new(),
            last_modified: None,
        };
        list.refresh();
        list
    }

    /// `true` when the address is allowed to connect.
    pub fn check(&self, addr: IpAddr) -> bool {
        !self.rules.iter().any(|r| r.matches(addr))
    }

    /// Re-read the backing file if it changed on disk.
    ///
    /// Returns `true` iff the effective rule set changed since the last
    /// call. A vanished file empties the rule set.
    pub fn refresh(&mut self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };

        let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
        if modified.is_some() && modified == self.last_modified {
            return false;
        }

        let new_rules = match fs::read_to_string(path) {
            Ok(text) => parse_rules(&text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "can't read blocklist");
                Vec::new()
            }
        };
        self.last_modified = modified;

        if new_rules == self.rules {
            return false;
        }
        debug!(
            path = %path.display(),
            rules = new_rules.len(),
            "blocklist reloaded"
        );
        self.rules = new_rules;
        true
    }
}

fn parse_rules(text: &str) -> Vec<Rule> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let rule = Rule::parse(l);
            if rule.is_none() {
                warn!(line = l, "ignoring malformed blocklist rule");
            }
            rule
        })
        .collect()
}

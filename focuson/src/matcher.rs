//! Deciding whether a navigation should be intercepted.

use std::collections::HashSet;

use url::Url;

use crate::timer::TimerSession;

/// Reduce a URL or bare domain to a lower-case hostname without `www.`.
///
/// Anything `url` cannot parse goes through a plain textual cleanup instead,
/// so this never fails.
pub fn normalize(input: &str) -> String {
    let trimmed = input.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    match Url::parse(&candidate) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) if !host.is_empty() => strip_www(&host.to_lowercase()).to_string(),
            _ => normalize_text(trimmed),
        },
        Err(_) => normalize_text(trimmed),
    }
}

fn normalize_text(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let host = strip_www(without_scheme);
    match host.find('/') {
        Some(idx) => host[..idx].to_string(),
        None => host.to_string(),
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Domains blocked during focus sessions. Entries are always normalized and
/// unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockList {
    entries: Vec<String>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for entry in entries {
            list.insert(entry.as_ref());
        }
        list
    }

    /// Returns false for empty input and for duplicates.
    pub fn insert(&mut self, entry: &str) -> bool {
        let normalized = normalize(entry);
        if normalized.is_empty() || self.contains(&normalized) {
            return false;
        }
        self.entries.push(normalized);
        true
    }

    pub fn remove(&mut self, entry: &str) -> bool {
        let normalized = normalize(entry);
        let before = self.entries.len();
        self.entries.retain(|e| *e != normalized);
        self.entries.len() != before
    }

    pub fn contains(&self, normalized: &str) -> bool {
        self.entries.iter().any(|e| e == normalized)
    }

    /// Whether `host` is an entry or a subdomain of one.
    pub fn matches(&self, host: &str) -> bool {
        self.entries.iter().any(|blocked| {
            host == blocked
                || host
                    .strip_suffix(blocked.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hosts the user chose to visit anyway during the current focus session.
#[derive(Debug, Clone, Default)]
pub struct TemporaryAllowSet {
    hosts: HashSet<String>,
}

impl TemporaryAllowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    pub fn clear(&mut self) {
        self.hosts.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

pub fn allow_temporarily(url: &str, allowed: &mut TemporaryAllowSet) {
    let host = normalize(url);
    if !host.is_empty() {
        allowed.hosts.insert(host);
    }
}

pub fn should_block(
    url: &str,
    session: &TimerSession,
    blocked: &BlockList,
    allowed: &TemporaryAllowSet,
) -> bool {
    if !session.is_running || !session.kind.blocks_sites() {
        return false;
    }
    let host = normalize(url);
    if host.is_empty() || allowed.contains(&host) {
        return false;
    }
    blocked.matches(&host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::Remaining;
    use focuson_ipc::SessionKind;

    fn session(is_running: bool, kind: SessionKind) -> TimerSession {
        TimerSession {
            remaining: Remaining::new(20, 0),
            is_running,
            kind,
        }
    }

    fn focus() -> TimerSession {
        session(true, SessionKind::Focus)
    }

    #[test]
    fn normalize_strips_scheme_www_and_path() {
        assert_eq!(normalize("https://www.EXAMPLE.com/page"), "example.com");
        assert_eq!(normalize("http://mail.example.com:8080/inbox?x=1"), "mail.example.com");
        assert_eq!(normalize("Example.com"), "example.com");
        assert_eq!(normalize("www.reddit.com/r/rust"), "reddit.com");
        assert_eq!(normalize("  news.ycombinator.com  "), "news.ycombinator.com");
    }

    #[test]
    fn normalize_falls_back_to_text_cleanup() {
        // Not a valid host for the URL parser.
        assert_eq!(normalize("https://exa mple.com/x"), "exa mple.com");
        assert_eq!(normalize("HTTP://WWW.Bad Host/path"), "bad host");
    }

    #[test]
    fn normalize_is_idempotent_on_hostnames() {
        for input in ["example.com", "mail.example.com", "localhost", "x.y.z.co.uk"] {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "input {input}");
        }
    }

    #[test]
    fn blocks_domain_and_subdomains_only() {
        let blocked = BlockList::from_entries(["example.com"]);
        let allowed = TemporaryAllowSet::new();

        assert!(should_block("https://www.EXAMPLE.com/page", &focus(), &blocked, &allowed));
        assert!(should_block("https://mail.example.com", &focus(), &blocked, &allowed));
        assert!(!should_block("https://notexample.com", &focus(), &blocked, &allowed));
        assert!(!should_block("https://example.com.evil.io", &focus(), &blocked, &allowed));
    }

    #[test]
    fn nothing_blocks_unless_a_focus_session_runs() {
        let blocked = BlockList::from_entries(["example.com", "reddit.com"]);
        let allowed = TemporaryAllowSet::new();

        for stopped in [
            session(false, SessionKind::Focus),
            session(false, SessionKind::LongBreak),
        ] {
            assert!(!should_block("example.com", &stopped, &blocked, &allowed));
        }
        assert!(!should_block("reddit.com", &session(true, SessionKind::ShortBreak), &blocked, &allowed));
    }

    #[test]
    fn temporary_allow_covers_the_exact_host() {
        let blocked = BlockList::from_entries(["example.com"]);
        let mut allowed = TemporaryAllowSet::new();

        assert!(should_block("https://sub.example.com", &focus(), &blocked, &allowed));
        allow_temporarily("https://sub.example.com/article", &mut allowed);
        assert!(!should_block("sub.example.com", &focus(), &blocked, &allowed));
        // The parent domain is still blocked.
        assert!(should_block("example.com", &focus(), &blocked, &allowed));

        allowed.clear();
        assert!(should_block("sub.example.com", &focus(), &blocked, &allowed));
    }

    #[test]
    fn block_list_entries_are_normalized_and_unique() {
        let mut list = BlockList::from_entries(["https://www.YouTube.com/", "youtube.com", ""]);
        assert_eq!(list.entries(), ["youtube.com"]);
        assert!(!list.insert("WWW.YOUTUBE.COM"));
        assert!(list.insert("twitch.tv"));
        assert!(list.remove("https://twitch.tv/videos"));
        assert_eq!(list.len(), 1);
    }
}

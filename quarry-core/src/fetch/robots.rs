//! robots.txt parsing and a per-origin policy cache.
//!
//! Rules follow the common crawler conventions: the most specific matching
//! user-agent group applies (falling back to `*`), the longest matching path
//! pattern wins, and `Allow` beats `Disallow` on a tie. Patterns support `*`
//! and a trailing `$`. Any failure to obtain robots.txt means "allow".

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::transport::HttpTransport;
use crate::cache::{Clock, SourceCache};

/// Product token matched against `User-agent` lines.
pub const ROBOTS_AGENT: &str = "quarry";

const ROBOTS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PathRule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct AgentGroup {
    agents: Vec<String>,
    rules: Vec<PathRule>,
}

/// Parsed robots.txt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotsRules {
    groups: Vec<AgentGroup>,
}

impl RobotsRules {
    /// Rules that allow everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(body: &str) -> Self {
        let mut groups: Vec<AgentGroup> = Vec::new();
        let mut current: Option<AgentGroup> = None;

        for raw_line in body.lines() {
            let line = raw_line.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // A user-agent line after rules starts a new group.
                    if current.as_ref().is_some_and(|g| !g.rules.is_empty()) {
                        groups.extend(current.take());
                    }
                    current
                        .get_or_insert_with(AgentGroup::default)
                        .agents
                        .push(value.to_ascii_lowercase());
                }
                "allow" | "disallow" => {
                    let Some(group) = current.as_mut() else {
                        continue;
                    };
                    // An empty Disallow means "allow everything"; it adds no rule.
                    if value.is_empty() {
                        continue;
                    }
                    group.rules.push(PathRule {
                        allow: key == "allow",
                        pattern: value.to_string(),
                    });
                }
                _ => {}
            }
        }
        groups.extend(current);
        Self { groups }
    }

    /// Whether `agent` may fetch `path` (path plus optional `?query`).
    pub fn is_allowed(&self, agent: &str, path: &str) -> bool {
        let agent = agent.to_ascii_lowercase();
        let specific = self
            .groups
            .iter()
            .filter_map(|g| {
                g.agents
                    .iter()
                    .filter(|a| a.as_str() != "*" && agent.contains(a.as_str()))
                    .map(|a| a.len())
                    .max()
                    .map(|len| (len, g))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, g)| g);
        let group = specific.or_else(|| {
            self.groups
                .iter()
                .find(|g| g.agents.iter().any(|a| a == "*"))
        });
        let Some(group) = group else {
            return true;
        };

        let mut best: Option<(usize, bool)> = None;
        for rule in &group.rules {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow))
                    if best_len > len || (best_len == len && best_allow) =>
                {
                    Some((best_len, best_allow))
                }
                _ => Some((len, rule.allow)),
            };
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let parts: Vec<&str> = pattern.split('*').collect();
    let last_index = parts.len() - 1;
    let mut pos = 0;

    for (i, part) in parts.iter().enumerate() {
        let is_last = i == last_index;
        if i == 0 {
            if !path.starts_with(part) {
                return false;
            }
            pos = part.len();
            if is_last && anchored {
                return pos == path.len();
            }
            continue;
        }
        if is_last && anchored {
            return path.len() >= pos + part.len() && path.ends_with(part);
        }
        match path[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }
    true
}

/// Per-origin robots.txt lookups with a TTL cache.
pub struct RobotsPolicy {
    transport: Arc<dyn HttpTransport>,
    cache: SourceCache,
    agent: String,
}

impl RobotsPolicy {
    pub fn new(transport: Arc<dyn HttpTransport>, ttl: Duration) -> Self {
        Self {
            transport,
            cache: SourceCache::in_memory(ttl),
            agent: ROBOTS_AGENT.to_string(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cache = self.cache.with_clock(clock);
        self
    }

    /// Check `url` against its origin's robots.txt, fetching it on a miss.
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        let rules = match self.cache.get::<RobotsRules>(&origin) {
            Some(rules) => rules,
            None => {
                let rules = self.fetch_rules(&origin).await;
                self.cache.put_best_effort(&origin, &rules);
                rules
            }
        };

        let mut path = url.path().to_string();
        if let Some(q) = url.query() {
            path.push('?');
            path.push_str(q);
        }
        let allowed = rules.is_allowed(&self.agent, &path);
        if !allowed {
            info!(url = %url, "Blocked by robots.txt");
        }
        allowed
    }

    async fn fetch_rules(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");
        match self.transport.get(&robots_url, ROBOTS_TIMEOUT).await {
            Ok(resp) if resp.is_success() => RobotsRules::parse(&resp.body),
            Ok(resp) => {
                debug!(url = %robots_url, status = resp.status, "No robots.txt, allowing");
                RobotsRules::allow_all()
            }
            Err(e) => {
                debug!(url = %robots_url, error = %e, "robots.txt unreachable, allowing");
                RobotsRules::allow_all()
            }
        }
    }
}

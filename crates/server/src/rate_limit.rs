use crate::config::RateLimitSection;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

const MAX_TRACKED_BUCKETS: usize = 10_000;

/// Request attributes the limiter needs; the HTTP layer extracts them so
/// this module stays transport-agnostic and testable.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestMeta<'a> {
    pub peer: Option<IpAddr>,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub authorization: Option<&'a str>,
    pub x_api_key: Option<&'a str>,
    pub x_forwarded_for: Option<&'a str>,
    pub x_real_ip: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Skip-listed path or IP; no bucket consulted.
    Skipped,
    Allowed {
        limit: u32,
        remaining: u32,
        reset_unix: u64,
    },
    Denied {
        limit: u32,
        reset_unix: u64,
        retry_after_secs: u64,
    },
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    fn parse(raw: &str) -> Option<Self> {
        let (addr_part, prefix_part) = match raw.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (raw, None),
        };
        let addr: IpAddr = addr_part.trim().parse().ok()?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix_part {
            Some(p) => p.trim().parse().ok().filter(|n: &u8| *n <= max)?,
            None => max,
        };
        Some(Self { addr, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        let (net, host): (Vec<u8>, Vec<u8>) = match (self.addr, ip) {
            (IpAddr::V4(a), IpAddr::V4(b)) => (a.octets().to_vec(), b.octets().to_vec()),
            (IpAddr::V6(a), IpAddr::V6(b)) => (a.octets().to_vec(), b.octets().to_vec()),
            _ => return false,
        };
        let mut remaining = self.prefix;
        for (n, h) in net.iter().zip(host.iter()) {
            if remaining == 0 {
                return true;
            }
            let bits = remaining.min(8);
            let mask = if bits == 8 { 0xff } else { !(0xffu8 >> bits) };
            if n & mask != h & mask {
                return false;
            }
            remaining -= bits;
        }
        true
    }
}

/// Token-bucket admission control keyed by bearer-token prefix, API key,
/// or client IP. Fail-open: internal errors log and admit the request.
pub struct RateLimiter {
    enabled: bool,
    limit_per_minute: u32,
    burst: f64,
    refill_per_sec: f64,
    trusted_proxies: Vec<Cidr>,
    skip_paths: Vec<String>,
    skip_ips: Vec<IpAddr>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitSection) -> Self {
        let trusted_proxies = config
            .trusted_proxies
            .iter()
            .filter_map(|raw| {
                let parsed = Cidr::parse(raw);
                if parsed.is_none() {
                    log::warn!("ignoring unparseable trusted proxy '{raw}'");
                }
                parsed
            })
            .collect();
        let skip_ips = config
            .skip_ips
            .iter()
            .filter_map(|raw| raw.trim().parse().ok())
            .collect();
        Self {
            enabled: config.enabled,
            limit_per_minute: config.requests_per_minute.max(1),
            burst: f64::from(config.burst.max(1)),
            refill_per_sec: f64::from(config.requests_per_minute.max(1)) / 60.0,
            trusted_proxies,
            skip_paths: config.skip_paths.clone(),
            skip_ips,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, meta: &RequestMeta<'_>) -> Decision {
        if !self.enabled {
            return Decision::Skipped;
        }
        if self.skip_paths.iter().any(|p| p == meta.path) {
            return Decision::Skipped;
        }

        let client_ip = self.resolve_ip(meta);
        if let Some(ip) = client_ip {
            if self.skip_ips.contains(&ip) {
                return Decision::Skipped;
            }
        }

        let identity = self.identify(meta, client_ip);
        self.admit(&identity)
    }

    /// Identifier selection order: bearer-token prefix, `api_key` query
    /// parameter, `X-API-Key` header, resolved client IP.
    fn identify(&self, meta: &RequestMeta<'_>, client_ip: Option<IpAddr>) -> String {
        if let Some(auth) = meta.authorization {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    let prefix: String = token.chars().take(8).collect();
                    return format!("token:{prefix}");
                }
            }
        }
        if let Some(query) = meta.query {
            if let Some(key) = query_param(query, "api_key") {
                return format!("key:{key}");
            }
        }
        if let Some(key) = meta.x_api_key {
            let key = key.trim();
            if !key.is_empty() {
                return format!("key:{key}");
            }
        }
        match client_ip {
            Some(ip) => format!("ip:{ip}"),
            None => "ip:unknown".to_string(),
        }
    }

    /// `X-Forwarded-For[0]` only when the immediate peer is a trusted
    /// proxy; then a syntactically valid `X-Real-IP`; else the peer.
    fn resolve_ip(&self, meta: &RequestMeta<'_>) -> Option<IpAddr> {
        let peer = meta.peer;
        let peer_trusted = peer
            .map(|ip| self.trusted_proxies.iter().any(|cidr| cidr.contains(ip)))
            .unwrap_or(false);

        if peer_trusted {
            if let Some(forwarded) = meta.x_forwarded_for {
                if let Some(first) = forwarded.split(',').next() {
                    if let Ok(ip) = first.trim().parse() {
                        return Some(ip);
                    }
                }
            }
        }
        if let Some(real) = meta.x_real_ip {
            if let Ok(ip) = real.trim().parse() {
                return Some(ip);
            }
        }
        peer
    }

    fn admit(&self, identity: &str) -> Decision {
        let Ok(mut buckets) = self.buckets.lock() else {
            // Fail-open on a poisoned lock.
            log::error!("rate limiter state poisoned; admitting request");
            return Decision::Allowed {
                limit: self.limit_per_minute,
                remaining: 0,
                reset_unix: now_unix(),
            };
        };

        if buckets.len() > MAX_TRACKED_BUCKETS {
            buckets.retain(|_, bucket| bucket.last_refill.elapsed().as_secs() < 600);
        }

        let now = Instant::now();
        let bucket = buckets.entry(identity.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.burst);
        bucket.last_refill = now;

        let refill_all_secs =
            ((self.burst - bucket.tokens) / self.refill_per_sec).ceil() as u64;
        let reset_unix = now_unix() + refill_all_secs;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Allowed {
                limit: self.limit_per_minute,
                remaining: bucket.tokens.floor() as u32,
                reset_unix,
            }
        } else {
            let retry_after_secs =
                (((1.0 - bucket.tokens) / self.refill_per_sec).ceil() as u64).max(1);
            Decision::Denied {
                limit: self.limit_per_minute,
                reset_unix,
                retry_after_secs,
            }
        }
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

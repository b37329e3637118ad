//! 分级固定窗口限流
//!
//! 客户端标识：用户 id 头 > X-Forwarded-For 第一个地址 > 对端地址。
//! 等级：premium 头为真 -> premium；有用户 id -> authenticated；否则 anonymous。
//! 每个标识一个计数窗口；后台任务清理空闲超过两个窗口的条目。排除路径直接放行。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RateLimitSection;

/// 流量等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Anonymous,
    Authenticated,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Authenticated => "authenticated",
            Tier::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 从请求中提取的身份信息（与传输层无关）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    pub user_id: Option<String>,
    pub forwarded_for: Option<String>,
    pub peer_addr: Option<String>,
    pub premium: bool,
}

impl RequestIdentity {
    /// 客户端标识，按优先级取第一个非空值
    pub fn client_key(&self) -> String {
        if let Some(uid) = non_empty(self.user_id.as_deref()) {
            return format!("user:{uid}");
        }
        if let Some(first) = self
            .forwarded_for
            .as_deref()
            .and_then(|v| v.split(',').next())
            .and_then(|s| non_empty(Some(s)))
        {
            return format!("ip:{first}");
        }
        match non_empty(self.peer_addr.as_deref()) {
            Some(peer) => format!("ip:{peer}"),
            None => "ip:unknown".to_string(),
        }
    }

    pub fn tier(&self) -> Tier {
        if self.premium {
            Tier::Premium
        } else if non_empty(self.user_id.as_deref()).is_some() {
            Tier::Authenticated
        } else {
            Tier::Anonymous
        }
    }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

/// premium 头的取值是否表示开启
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// 返回给调用方的限流信息，对应 X-RateLimit-* 头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// 窗口重置时刻（Unix 秒）
    pub reset: u64,
    pub tier: Tier,
}

impl RateLimitInfo {
    pub fn headers(&self) -> [(&'static str, String); 4] {
        [
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset.to_string()),
            ("x-ratelimit-tier", self.tier.to_string()),
        ]
    }
}

/// 准入结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// 排除路径或限流关闭
    Bypassed,
    Admitted(RateLimitInfo),
    Denied {
        info: RateLimitInfo,
        retry_after_secs: u64,
    },
}

/// 单个标识的窗口状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub client_key: String,
    pub request_count: u32,
    pub window_start: u64,
}

pub struct RateLimiter {
    cfg: RateLimitSection,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl RateLimiter {
    pub fn new(cfg: RateLimitSection) -> Self {
        Self {
            cfg,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitSection {
        &self.cfg
    }

    fn window(&self) -> u64 {
        self.cfg.window_secs.max(1)
    }

    pub fn limit_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Anonymous => self.cfg.anonymous,
            Tier::Authenticated => self.cfg.authenticated,
            Tier::Premium => self.cfg.premium,
        }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.cfg.excluded_paths.iter().any(|p| p == path)
    }

    pub fn check(&self, identity: &RequestIdentity, path: &str) -> Admission {
        self.check_at(identity, path, now_secs())
    }

    /// 以给定时刻判定准入（now 为 Unix 秒）
    pub fn check_at(&self, identity: &RequestIdentity, path: &str, now: u64) -> Admission {
        if !self.cfg.enabled || self.is_excluded(path) {
            return Admission::Bypassed;
        }
        let key = identity.client_key();
        let tier = identity.tier();
        let limit = self.limit_for(tier);
        let window = self.window();

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(key.clone()).or_insert_with(|| RateLimitEntry {
            client_key: key.clone(),
            request_count: 0,
            window_start: now,
        });
        if now.saturating_sub(entry.window_start) >= window {
            entry.request_count = 0;
            entry.window_start = now;
        }
        let reset = entry.window_start + window;

        if entry.request_count >= limit {
            let retry_after_secs = reset.saturating_sub(now).max(1);
            tracing::debug!(client = %key, tier = %tier, retry_after_secs, "rate limited");
            return Admission::Denied {
                info: RateLimitInfo {
                    limit,
                    remaining: 0,
                    reset,
                    tier,
                },
                retry_after_secs,
            };
        }
        entry.request_count += 1;
        Admission::Admitted(RateLimitInfo {
            limit,
            remaining: limit - entry.request_count,
            reset,
            tier,
        })
    }

    /// 删除窗口空闲达到两个窗口长度的条目，返回删除数量
    pub fn sweep_at(&self, now: u64) -> usize {
        let idle = self.window() * 2;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, e| now.saturating_sub(e.window_start) < idle);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 后台定期清理，token 取消时退出
    pub fn spawn_sweeper(self: &Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        let every = Duration::from_secs(self.cfg.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = limiter.sweep_at(now_secs());
                        if removed > 0 {
                            tracing::debug!(removed, "rate limit entries swept");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(anonymous: u32, window: u64) -> RateLimiter {
        RateLimiter::new(RateLimitSection {
            anonymous,
            window_secs: window,
            ..RateLimitSection::default()
        })
    }

    fn anon(ip: &str) -> RequestIdentity {
        RequestIdentity {
            peer_addr: Some(ip.to_string()),
            ..RequestIdentity::default()
        }
    }

    #[test]
    fn test_client_key_priority() {
        let id = RequestIdentity {
            user_id: Some("u1".into()),
            forwarded_for: Some("1.1.1.1, 2.2.2.2".into()),
            peer_addr: Some("3.3.3.3".into()),
            premium: false,
        };
        assert_eq!(id.client_key(), "user:u1");
        let id = RequestIdentity {
            user_id: Some("  ".into()),
            ..id
        };
        assert_eq!(id.client_key(), "ip:1.1.1.1");
        assert_eq!(anon("3.3.3.3").client_key(), "ip:3.3.3.3");
        assert_eq!(RequestIdentity::default().client_key(), "ip:unknown");
    }

    #[test]
    fn test_tier_derivation() {
        assert_eq!(anon("x").tier(), Tier::Anonymous);
        let user = RequestIdentity {
            user_id: Some("u".into()),
            ..RequestIdentity::default()
        };
        assert_eq!(user.tier(), Tier::Authenticated);
        let premium = RequestIdentity {
            premium: true,
            ..RequestIdentity::default()
        };
        assert_eq!(premium.tier(), Tier::Premium);
        assert!(is_truthy("True") && !is_truthy("0"));
    }

    #[test]
    fn test_exactly_limit_admissions_per_window() {
        let rl = limiter(5, 60);
        let id = anon("9.9.9.9");
        let t0 = 1_000;
        for i in 0..5 {
            match rl.check_at(&id, "/run", t0 + i) {
                Admission::Admitted(info) => assert_eq!(info.remaining, 4 - i as u32),
                other => panic!("request {i} should be admitted: {other:?}"),
            }
        }
        match rl.check_at(&id, "/run", t0 + 10) {
            Admission::Denied {
                info,
                retry_after_secs,
            } => {
                assert_eq!(info.remaining, 0);
                assert_eq!(info.reset, t0 + 60);
                assert_eq!(retry_after_secs, 50);
            }
            other => panic!("6th request should be denied: {other:?}"),
        }
        // 窗口过后再次允许 L 次
        for _ in 0..5 {
            assert!(matches!(rl.check_at(&id, "/run", t0 + 60), Admission::Admitted(_)));
        }
        assert!(matches!(rl.check_at(&id, "/run", t0 + 61), Admission::Denied { .. }));
    }

    #[test]
    fn test_keys_are_independent_and_excluded_paths_bypass() {
        let rl = limiter(1, 60);
        assert!(matches!(rl.check_at(&anon("a"), "/run", 0), Admission::Admitted(_)));
        assert!(matches!(rl.check_at(&anon("b"), "/run", 0), Admission::Admitted(_)));
        assert!(matches!(rl.check_at(&anon("a"), "/run", 1), Admission::Denied { .. }));
        assert_eq!(rl.check_at(&anon("a"), "/api/health", 1), Admission::Bypassed);
    }

    #[test]
    fn test_disabled_limiter_bypasses() {
        let rl = RateLimiter::new(RateLimitSection {
            enabled: false,
            ..RateLimitSection::default()
        });
        assert_eq!(rl.check_at(&anon("a"), "/run", 0), Admission::Bypassed);
    }

    #[test]
    fn test_sweep_removes_idle_entries() {
        let rl = limiter(10, 60);
        rl.check_at(&anon("old"), "/run", 0);
        rl.check_at(&anon("new"), "/run", 100);
        assert_eq!(rl.len(), 2);
        assert_eq!(rl.sweep_at(119), 0);
        assert_eq!(rl.sweep_at(120), 1);
        assert_eq!(rl.len(), 1);
    }
}

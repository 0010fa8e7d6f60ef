//! Coarse user-agent classification.
//!
//! Automated agents are checked before device form factor, so a UA that
//! mentions both `bot` and `mobile` is a bot. Bot traffic drives log
//! suppression and error-report filtering in the request pipeline.

use std::fmt;

use serde::Serialize;

/// Substrings that mark an automated agent.
const BOT_MARKERS: [&str; 3] = ["bot", "crawler", "spider"];

/// Caller category derived from the `User-Agent` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAgentCategory {
    Bot,
    Mobile,
    Tablet,
    Desktop,
}

impl UserAgentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
        }
    }

    pub fn is_bot(self) -> bool {
        self == Self::Bot
    }
}

impl fmt::Display for UserAgentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categorize a raw user-agent string (case-insensitive).
pub fn categorize_user_agent(ua: &str) -> UserAgentCategory {
    let ua = ua.to_lowercase();

    if BOT_MARKERS.iter().any(|marker| ua.contains(marker)) {
        UserAgentCategory::Bot
    } else if ua.contains("mobile") {
        UserAgentCategory::Mobile
    } else if ua.contains("tablet") {
        UserAgentCategory::Tablet
    } else {
        UserAgentCategory::Desktop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_wins_over_mobile() {
        assert_eq!(categorize_user_agent("mobile bot"), UserAgentCategory::Bot);
    }

    #[test]
    fn test_known_crawlers() {
        assert_eq!(
            categorize_user_agent("Googlebot/2.1"),
            UserAgentCategory::Bot
        );
        assert_eq!(
            categorize_user_agent("Mozilla/5.0 (compatible; AhrefsCrawler)"),
            UserAgentCategory::Bot
        );
        assert_eq!(categorize_user_agent("Baiduspider"), UserAgentCategory::Bot);
    }

    #[test]
    fn test_form_factors() {
        assert_eq!(
            categorize_user_agent("Mozilla/5.0 Mobile"),
            UserAgentCategory::Mobile
        );
        assert_eq!(
            categorize_user_agent("Mozilla/5.0 (Linux; Android 13; Tablet)"),
            UserAgentCategory::Tablet
        );
        assert_eq!(
            categorize_user_agent("Mozilla/5.0 (Windows NT 10.0)"),
            UserAgentCategory::Desktop
        );
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        assert_eq!(categorize_user_agent("GOOGLEBOT"), UserAgentCategory::Bot);
        assert_eq!(
            categorize_user_agent("mOBILE safari"),
            UserAgentCategory::Mobile
        );
    }

    #[test]
    fn test_empty_user_agent_is_desktop() {
        assert_eq!(categorize_user_agent(""), UserAgentCategory::Desktop);
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&UserAgentCategory::Tablet).unwrap_or_default(),
            "\"tablet\""
        );
    }
}

//! Default User-Agent for fetch requests.

/// Product token sent by every crawl worker unless the configuration overrides it.
const PRODUCT: &str = "crawl-fetcher";

/// Default User-Agent for page fetches (identifies the crawler and its version).
#[must_use]
pub(crate) fn default_fetch_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{PRODUCT}/{version} (web-crawler)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_user_agent_contains_crate_version() {
        let ua = default_fetch_user_agent();
        assert_eq!(
            env!("CARGO_PKG_VERSION"),
            ua.strip_prefix("crawl-fetcher/")
                .and_then(|s| s.split(' ').next())
                .expect("user agent has version"),
            "user agent must contain crate version"
        );
    }

    #[test]
    fn test_default_user_agent_identifies_as_crawler() {
        let ua = default_fetch_user_agent();
        assert!(ua.ends_with("(web-crawler)"), "unexpected user agent: {ua}");
    }
}

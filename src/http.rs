use std::time::Duration;

const USER_AGENT: &str =
    "Mozilla/5.0 (compatible; hydrate_tracker/0.1; +https://github.com/angeloanan/hydrate-reminder)";

/// Shared client for every call against the health store and OAuth endpoints.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()
}

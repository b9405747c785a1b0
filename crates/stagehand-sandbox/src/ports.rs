use once_cell::sync::Lazy;
use regex::Regex;

static LISTEN_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{2,5})").unwrap()
});

/// Find a local listening URL announced in process output.
pub fn detect_port(line: &str) -> Option<(u16, String)> {
    let caps = LISTEN_URL_RE.captures(line)?;
    let port = caps[1].parse::<u16>().ok()?;
    Some((port, format!("http://localhost:{port}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_dev_server_banners() {
        assert_eq!(
            detect_port("  ➜  Local:   http://localhost:5173/"),
            Some((5173, "http://localhost:5173".into()))
        );
        assert_eq!(
            detect_port("ready - started server on 0.0.0.0:3000, url: http://127.0.0.1:3000"),
            Some((3000, "http://localhost:3000".into()))
        );
        assert_eq!(detect_port("compiled successfully"), None);
        assert_eq!(detect_port("http://localhost:99999"), None);
    }
}

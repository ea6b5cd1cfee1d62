use once_cell::sync::Lazy;
use regex::Regex;

/// `name/1.2.3`, `name-1.2.3` and `name 1.2.3`, tried in that order.
static VERSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(\w+)/(\d+\.[\d.]*\d)",
        r"(?i)(\w+)-(\d+\.[\d.]*\d)",
        r"(?i)(\w+)\s+(\d+\.[\d.]*\d)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Conventional service for a well-known port.
pub fn well_known_service(port: u16) -> Option<&'static str> {
    let name = match port {
        21 => "FTP",
        22 => "SSH",
        23 => "Telnet",
        25 | 587 => "SMTP",
        53 => "DNS",
        80 | 8000 | 8080 => "HTTP",
        110 => "POP3",
        143 => "IMAP",
        443 | 8443 => "HTTPS",
        993 => "IMAPS",
        995 => "POP3S",
        3306 => "MySQL",
        5432 => "PostgreSQL",
        6379 => "Redis",
        _ => return None,
    };
    Some(name)
}

/// Name the service behind `port`, preferring what the banner says over the port convention.
pub fn identify(port: u16, banner: &str) -> String {
    let upper = banner.trim_start().to_ascii_uppercase();
    let from_banner = if upper.starts_with("SSH-") {
        Some("SSH")
    } else if upper.starts_with("HTTP/") {
        Some("HTTP")
    } else if upper.starts_with("+OK") {
        Some("POP3")
    } else if upper.starts_with("* OK") {
        Some("IMAP")
    } else if upper.starts_with("220") && upper.contains("FTP") {
        Some("FTP")
    } else if upper.starts_with("220") && upper.contains("SMTP") {
        Some("SMTP")
    } else {
        None
    };
    match from_banner.or_else(|| well_known_service(port)) {
        Some(name) => name.to_string(),
        None => format!("unknown({port})"),
    }
}

/// Pull a `software version` pair out of a banner, if one is there.
pub fn extract_version(banner: &str) -> Option<String> {
    VERSION_PATTERNS.iter().find_map(|re| {
        re.captures(banner)
            .map(|caps| format!("{} {}", &caps[1], &caps[2]))
    })
}

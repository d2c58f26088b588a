use crate::domain_utils::DomainUtils;
use serde::{Deserialize, Serialize};

/// Site category used by the trust learner. `Unknown` means "no category".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlCategory {
    #[default]
    Unknown,
    Banking,
    Shopping,
    Social,
    Email,
    Search,
    News,
    Streaming,
    Gambling,
    Adult,
    FileSharing,
}

impl UrlCategory {
    pub fn is_known(self) -> bool {
        self != UrlCategory::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UrlCategory::Unknown => "unknown",
            UrlCategory::Banking => "banking",
            UrlCategory::Shopping => "shopping",
            UrlCategory::Social => "social",
            UrlCategory::Email => "email",
            UrlCategory::Search => "search",
            UrlCategory::News => "news",
            UrlCategory::Streaming => "streaming",
            UrlCategory::Gambling => "gambling",
            UrlCategory::Adult => "adult",
            UrlCategory::FileSharing => "file_sharing",
        }
    }
}

const KNOWN_DOMAINS: &[(UrlCategory, &[&str])] = &[
    (
        UrlCategory::Banking,
        &["paypal.com", "chase.com", "bankofamerica.com", "wellsfargo.com", "citi.com", "hsbc.com", "barclays.co.uk", "capitalone.com"],
    ),
    (
        UrlCategory::Shopping,
        &["amazon.com", "ebay.com", "etsy.com", "walmart.com", "aliexpress.com", "target.com", "bestbuy.com"],
    ),
    (
        UrlCategory::Social,
        &["facebook.com", "instagram.com", "twitter.com", "x.com", "linkedin.com", "reddit.com", "tiktok.com"],
    ),
    (
        UrlCategory::Email,
        &["gmail.com", "outlook.com", "yahoo.com", "proton.me", "protonmail.com", "icloud.com"],
    ),
    (
        UrlCategory::Search,
        &["google.com", "bing.com", "duckduckgo.com", "yandex.com", "baidu.com"],
    ),
    (
        UrlCategory::News,
        &["bbc.co.uk", "bbc.com", "nytimes.com", "cnn.com", "theguardian.com", "reuters.com"],
    ),
    (
        UrlCategory::Streaming,
        &["youtube.com", "netflix.com", "twitch.tv", "spotify.com", "vimeo.com"],
    ),
    (
        UrlCategory::FileSharing,
        &["dropbox.com", "mega.nz", "mediafire.com", "wetransfer.com", "drive.google.com"],
    ),
];

const KEYWORDS: &[(UrlCategory, &[&str])] = &[
    (UrlCategory::Gambling, &["casino", "poker", "bet", "slots", "lottery"]),
    (UrlCategory::Adult, &["porn", "xxx", "adult", "sex"]),
    (UrlCategory::Banking, &["bank", "credit", "wallet", "finance"]),
    (UrlCategory::Shopping, &["shop", "store", "deals", "outlet"]),
    (UrlCategory::Email, &["mail", "webmail"]),
    (UrlCategory::News, &["news", "times", "herald"]),
    (UrlCategory::Streaming, &["stream", "movies", "tv"]),
    (UrlCategory::FileSharing, &["upload", "share", "files"]),
];

/// Map a hostname onto a site category.
pub fn classify_host(host: &str) -> UrlCategory {
    let host = DomainUtils::canonicalize_domain(host);

    // Checked before its parent domain lands in Search
    if DomainUtils::matches_domain_list(&host, &["drive.google.com"]) {
        return UrlCategory::FileSharing;
    }

    for (category, domains) in KNOWN_DOMAINS {
        if DomainUtils::matches_domain_list(&host, domains) {
            return *category;
        }
    }

    let registrable = DomainUtils::registrable_domain(&host);
    let label = registrable.split('.').next().unwrap_or_default();
    // Keywords must start a hyphen/digit-separated token: "bank-login" but not "alphabet"
    let tokens: Vec<&str> = label
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|t| !t.is_empty())
        .collect();
    for (category, words) in KEYWORDS {
        if tokens
            .iter()
            .any(|token| words.iter().any(|w| token.starts_with(w)))
        {
            return *category;
        }
    }

    UrlCategory::Unknown
}

/// Category of a URL; `Unknown` when it has no host.
pub fn classify_url(url: &str) -> UrlCategory {
    DomainUtils::extract_host(url)
        .map(|host| classify_host(&host))
        .unwrap_or_default()
}

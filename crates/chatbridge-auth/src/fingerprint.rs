//! Randomized client identity.
//!
//! Every session acquisition picks a fresh identity so outbound traffic is not
//! trivially correlated. The attributes are drawn together: the user-agent,
//! client-hint headers, platform and viewport always describe the same
//! browser on the same OS, and `Accept-Language` always matches the locale.

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use serde::Serialize;

const CHROMIUM_MAJORS: std::ops::RangeInclusive<u32> = 126..=133;

const LOCALES: &[(&str, &str)] = &[
    ("en-US", "en-US,en;q=0.9"),
    ("en-GB", "en-GB,en;q=0.9,en-US;q=0.8"),
    ("de-DE", "de-DE,de;q=0.9,en-US;q=0.8,en;q=0.7"),
    ("fr-FR", "fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7"),
    ("ja-JP", "ja-JP,ja;q=0.9,en-US;q=0.8,en;q=0.7"),
    ("zh-CN", "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
];

const DESKTOP_VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1536, 864),
    (1366, 768),
    (1600, 900),
    (2560, 1440),
    (1680, 1050),
];

const MAC_VIEWPORTS: &[(u32, u32)] = &[(1440, 900), (1512, 982), (1728, 1117), (1280, 800)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    fn ua_os_token(self) -> &'static str {
        match self {
            Platform::Windows => "Windows NT 10.0; Win64; x64",
            Platform::MacOs => "Macintosh; Intel Mac OS X 10_15_7",
            Platform::Linux => "X11; Linux x86_64",
        }
    }

    /// Value of the `sec-ch-ua-platform` client hint (without quotes).
    pub fn client_hint(self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
        }
    }

    fn viewports(self) -> &'static [(u32, u32)] {
        match self {
            Platform::MacOs => MAC_VIEWPORTS,
            Platform::Windows | Platform::Linux => DESKTOP_VIEWPORTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Chrome,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    pub browser: Browser,
    pub platform: Platform,
    pub major_version: u32,
    pub user_agent: String,
    pub locale: String,
    pub accept_language: String,
    pub viewport: Viewport,
}

impl Fingerprint {
    pub fn random() -> Self {
        Self::generate(&mut rand::thread_rng())
    }

    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let platform = *[Platform::Windows, Platform::MacOs, Platform::Linux]
            .choose(rng)
            .unwrap_or(&Platform::Windows);

        // Edge on Linux is rare enough to stand out.
        let browser = if platform != Platform::Linux && rng.gen_bool(0.25) {
            Browser::Edge
        } else {
            Browser::Chrome
        };

        let major_version = rng.gen_range(CHROMIUM_MAJORS);
        let (locale, accept_language) = *LOCALES.choose(rng).unwrap_or(&LOCALES[0]);
        let (width, height) = *platform
            .viewports()
            .choose(rng)
            .unwrap_or(&DESKTOP_VIEWPORTS[0]);

        let mut user_agent = format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{}.0.0.0 Safari/537.36",
            platform.ua_os_token(),
            major_version
        );
        if browser == Browser::Edge {
            user_agent.push_str(&format!(" Edg/{}.0.0.0", major_version));
        }

        Self {
            browser,
            platform,
            major_version,
            user_agent,
            locale: locale.to_string(),
            accept_language: accept_language.to_string(),
            viewport: Viewport { width, height },
        }
    }

    /// Value of the `sec-ch-ua` client hint.
    pub fn client_hint_brands(&self) -> String {
        let brand = match self.browser {
            Browser::Chrome => "Google Chrome",
            Browser::Edge => "Microsoft Edge",
        };
        format!(
            "\"Chromium\";v=\"{v}\", \"Not_A Brand\";v=\"24\", \"{brand}\";v=\"{v}\"",
            v = self.major_version,
            brand = brand
        )
    }

    /// Identity headers to attach to every request made under this fingerprint.
    pub fn header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let pairs = [
            (USER_AGENT, self.user_agent.clone()),
            (ACCEPT_LANGUAGE, self.accept_language.clone()),
            (HeaderName::from_static("sec-ch-ua"), self.client_hint_brands()),
            (HeaderName::from_static("sec-ch-ua-mobile"), "?0".to_string()),
            (
                HeaderName::from_static("sec-ch-ua-platform"),
                format!("\"{}\"", self.platform.client_hint()),
            ),
        ];
        for (name, value) in pairs {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
        headers
    }
}

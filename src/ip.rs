//! Real client IP extraction.
//!
//! Behind a reverse proxy the TCP peer is the proxy, not the client. The
//! strategy is picked in [`ServerConfig::ip_extractor`](crate::config::ServerConfig)
//! and must match what the proxy actually sets: trusting `X-Forwarded-For`
//! on a directly exposed port lets clients spoof their address.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::request::Request;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum IpExtractor {
    /// The TCP peer address.
    #[default]
    Direct,
    /// First entry of `X-Forwarded-For`, falling back to the peer.
    XForwardedFor,
    /// `X-Real-IP`, falling back to the peer.
    XRealIp,
}

impl IpExtractor {
    pub fn extract(self, req: &Request) -> String {
        let header = match self {
            Self::Direct => None,
            Self::XForwardedFor => req.header("x-forwarded-for"),
            Self::XRealIp => req.header("x-real-ip"),
        };

        header
            .and_then(first_address)
            .or_else(|| req.remote_addr().map(|addr| addr.ip().to_string()))
            .unwrap_or_default()
    }
}

fn first_address(value: &str) -> Option<String> {
    let ip = value.split(',').next()?.trim().trim_matches(|c| c == '[' || c == ']');
    (!ip.is_empty()).then(|| ip.to_owned())
}

impl FromStr for IpExtractor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "x-forwarded-for" | "xff" => Ok(Self::XForwardedFor),
            "x-real-ip" => Ok(Self::XRealIp),
            other => Err(format!("unknown ip extractor `{other}`")),
        }
    }
}

impl fmt::Display for IpExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::XForwardedFor => "x-forwarded-for",
            Self::XRealIp => "x-real-ip",
        })
    }
}

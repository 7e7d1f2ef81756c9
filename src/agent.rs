//! User-agent classification.
//!
//! Wraps the woothee parser and maps its result onto the browser/device
//! shapes stored in visit records.

use std::sync::Arc;

use woothee::parser::Parser;
use woothee::woothee::VALUE_UNKNOWN;

use crate::model::{BrowserInfo, DeviceInfo, UNKNOWN};

#[derive(Clone)]
pub struct AgentParser {
    parser: Arc<Parser>,
}

impl std::fmt::Debug for AgentParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentParser").finish_non_exhaustive()
    }
}

impl AgentParser {
    pub fn new() -> Self {
        Self {
            parser: Arc::new(Parser::new()),
        }
    }

    /// Classifies a raw user-agent header. Unparseable agents come back as
    /// "Unknown" with every category flag off; the raw string is always kept.
    pub fn classify(&self, user_agent: &str) -> BrowserInfo {
        match self.parser.parse(user_agent) {
            Some(result) => {
                let category = result.category.to_string();
                BrowserInfo {
                    browser: or_unknown(result.name.to_string()),
                    version: or_unknown(result.version.to_string()),
                    os: or_unknown(result.os.to_string()),
                    platform: or_unknown(result.vendor.to_string()),
                    is_mobile: category == "smartphone" || category == "mobilephone",
                    is_tablet: category == "tablet",
                    is_desktop: category == "pc",
                    is_bot: category == "crawler",
                    user_agent_raw: user_agent.to_string(),
                }
            }
            None => BrowserInfo {
                user_agent_raw: user_agent.to_string(),
                ..BrowserInfo::default()
            },
        }
    }
}

impl Default for AgentParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Coarse device bucket derived from the classification flags. The parser
/// cannot see a hardware model, so that stays "Unknown".
pub fn device_info(browser: &BrowserInfo) -> DeviceInfo {
    let device_type = if browser.is_bot {
        "bot"
    } else if browser.is_tablet {
        "tablet"
    } else if browser.is_mobile {
        "mobile"
    } else if browser.is_desktop {
        "desktop"
    } else {
        UNKNOWN
    };

    DeviceInfo {
        device_type: device_type.to_string(),
        model: UNKNOWN.to_string(),
        manufacturer: browser.platform.clone(),
    }
}

fn or_unknown(value: String) -> String {
    if value.is_empty() || value == VALUE_UNKNOWN {
        UNKNOWN.to_string()
    } else {
        value
    }
}

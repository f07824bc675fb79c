//! Message rendering

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{Alert, AlertClass, AlertKind, MarketContext};

pub const COLOR_DRAWDOWN: u32 = 16711680;
pub const COLOR_TARGET: u32 = 16753920;
pub const COLOR_MIXED: u32 = 10181046;

/// Embed description limit of the webhook API
const DESCRIPTION_LIMIT: usize = 4096;
const TRUNCATION_MARKER: &str = "\n… (truncated)";

/// A rendered notification, one per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub title: String,
    pub color: u32,
    pub description: String,
    pub footer: String,
    pub username: String,
}

impl WebhookMessage {
    /// JSON body for the webhook POST
    pub fn to_payload(&self) -> Value {
        json!({
            "username": self.username,
            "embeds": [{
                "title": self.title,
                "description": self.description,
                "color": self.color,
                "footer": { "text": self.footer },
            }]
        })
    }
}

/// Format price with precision picked by magnitude
pub fn format_price(price: f64) -> String {
    if price == 0.0 {
        return "$0".to_string();
    }
    let abs_price = price.abs();
    let sign = if price < 0.0 { "-" } else { "" };
    if abs_price >= 1000.0 {
        format!("{}${:.2}", sign, abs_price)
    } else if abs_price >= 1.0 {
        format!("{}${:.4}", sign, abs_price)
    } else if abs_price >= 0.01 {
        format!("{}${:.6}", sign, abs_price)
    } else {
        format!("{}${:.8}", sign, abs_price)
    }
}

fn format_pct(value: f64) -> String {
    format!("{:+.2}%", value)
}

fn format_threshold(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}%", value)
    } else {
        format!("{}%", value)
    }
}

fn context_lines(context: &MarketContext, out: &mut Vec<String>) {
    let mut changes = Vec::new();
    if let Some(c) = context.change_24h_pct {
        changes.push(format!("24h: {}", format_pct(c)));
    }
    if let Some(c) = context.change_7d_pct {
        changes.push(format!("7d: {}", format_pct(c)));
    }
    if let Some(rank) = context.market_cap_rank {
        changes.push(format!("Rank #{}", rank));
    }
    if !changes.is_empty() {
        out.push(changes.join(" | "));
    }

    if let Some(range) = context.range {
        out.push(format!(
            "52w High: {} ({:.2}% below) | 52w Low: {} ({:.2}% above)",
            format_price(range.high_52w),
            range.pct_from_high,
            format_price(range.low_52w),
            range.pct_from_low
        ));
    }
}

fn render_alert(alert: &Alert) -> String {
    let mut lines = vec![format!("**{}**", alert.label)];

    match alert.kind {
        AlertKind::Drawdown {
            ath_price,
            drop_percent,
            threshold,
        } => {
            lines.push(format!(
                "Price: {} | ATH: {}",
                format_price(alert.current_price),
                format_price(ath_price)
            ));
            lines.push(format!(
                "Down {:.2}% from ATH (crossed {} threshold)",
                drop_percent,
                format_threshold(threshold)
            ));
        }
        AlertKind::Target {
            target_price,
            price_diff,
            price_diff_percent,
        } => {
            lines.push(format!(
                "Price: {} | Target: {}",
                format_price(alert.current_price),
                format_price(target_price)
            ));
            lines.push(format!(
                "Diff: {} ({})",
                format_price(price_diff),
                format_pct(price_diff_percent)
            ));
        }
    }

    context_lines(&alert.context, &mut lines);
    lines.join("\n")
}

fn render_section(heading: &str, alerts: &[&Alert]) -> Option<String> {
    if alerts.is_empty() {
        return None;
    }
    let body: Vec<String> = alerts.iter().map(|a| render_alert(a)).collect();
    Some(format!("{}\n\n{}", heading, body.join("\n\n")))
}

fn truncate_description(description: String) -> String {
    if description.chars().count() <= DESCRIPTION_LIMIT {
        return description;
    }
    let keep = DESCRIPTION_LIMIT - TRUNCATION_MARKER.chars().count();
    let mut truncated: String = description.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Render a batch of alerts into one message. Sections with no alerts are left out.
pub fn format_message(alerts: &[Alert], now: DateTime<Utc>, bot_name: &str) -> WebhookMessage {
    let drawdowns: Vec<&Alert> = alerts
        .iter()
        .filter(|a| a.class() == AlertClass::Drawdown)
        .collect();
    let targets: Vec<&Alert> = alerts
        .iter()
        .filter(|a| a.class() == AlertClass::Target)
        .collect();

    let color = match (drawdowns.is_empty(), targets.is_empty()) {
        (false, true) => COLOR_DRAWDOWN,
        (true, false) => COLOR_TARGET,
        _ => COLOR_MIXED,
    };

    let sections: Vec<String> = [
        render_section("**📉 ATH Drop Alerts**", &drawdowns),
        render_section("**🎯 Price Alerts**", &targets),
    ]
    .into_iter()
    .flatten()
    .collect();

    let count = alerts.len();
    WebhookMessage {
        title: format!(
            "🚨 Crypto Alert: {} alert{}",
            count,
            if count == 1 { "" } else { "s" }
        ),
        color,
        description: truncate_description(sections.join("\n\n")),
        footer: format!("{} • {}", bot_name, now.format("%Y-%m-%d %H:%M:%S UTC")),
        username: bot_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertKey, RangeContext};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap()
    }

    fn drawdown_alert() -> Alert {
        Alert {
            asset_id: "bitcoin".to_string(),
            label: "Bitcoin (BTC)".to_string(),
            current_price: 48300.0,
            kind: AlertKind::Drawdown {
                ath_price: 69000.0,
                drop_percent: 30.0,
                threshold: 30.0,
            },
            context: MarketContext {
                change_24h_pct: Some(-2.5),
                change_7d_pct: None,
                market_cap_rank: Some(1),
                range: Some(RangeContext::new(73000.0, 40000.0, 48300.0)),
            },
            consumed_keys: vec![AlertKey::new("bitcoin", AlertClass::Drawdown, 30.0)],
        }
    }

    fn target_alert() -> Alert {
        Alert {
            asset_id: "bitcoin".to_string(),
            label: "Bitcoin (BTC)".to_string(),
            current_price: 69000.0,
            kind: AlertKind::Target {
                target_price: 70000.0,
                price_diff: -1000.0,
                price_diff_percent: -1.43,
            },
            context: MarketContext::default(),
            consumed_keys: vec![AlertKey::new("bitcoin", AlertClass::Target, 70000.0)],
        }
    }

    #[test]
    fn price_precision_by_magnitude() {
        assert_eq!(format_price(0.0), "$0");
        assert_eq!(format_price(69000.0), "$69000.00");
        assert_eq!(format_price(2.5), "$2.5000");
        assert_eq!(format_price(0.05), "$0.050000");
        assert_eq!(format_price(0.00001234), "$0.00001234");
        assert_eq!(format_price(-1000.0), "-$1000.00");
    }

    #[test]
    fn drawdown_only_batch_is_red_without_target_section() {
        let msg = format_message(&[drawdown_alert()], now(), "Crypto Alert Bot");

        assert_eq!(msg.title, "🚨 Crypto Alert: 1 alert");
        assert_eq!(msg.color, COLOR_DRAWDOWN);
        assert!(msg.description.contains("ATH Drop Alerts"));
        assert!(!msg.description.contains("Price Alerts"));
        assert!(msg.description.contains("Down 30.00% from ATH (crossed 30% threshold)"));
        assert!(msg.description.contains("24h: -2.50% | Rank #1"));
        assert!(msg.description.contains("52w High: $73000.00"));
        assert_eq!(msg.footer, "Crypto Alert Bot • 2026-10-19 08:30:00 UTC");
    }

    #[test]
    fn target_only_batch_is_orange() {
        let msg = format_message(&[target_alert()], now(), "Crypto Alert Bot");

        assert_eq!(msg.color, COLOR_TARGET);
        assert!(msg.description.contains("Price Alerts"));
        assert!(!msg.description.contains("ATH Drop Alerts"));
        assert!(msg.description.contains("Diff: -$1000.00 (-1.43%)"));
    }

    #[test]
    fn mixed_batch_has_both_sections_in_order() {
        let mut eth = target_alert();
        eth.asset_id = "ethereum".to_string();
        eth.label = "Ethereum (ETH)".to_string();

        let msg = format_message(&[eth, drawdown_alert()], now(), "Crypto Alert Bot");

        assert_eq!(msg.title, "🚨 Crypto Alert: 2 alerts");
        assert_eq!(msg.color, COLOR_MIXED);
        let ath_at = msg.description.find("ATH Drop Alerts").unwrap();
        let price_at = msg.description.find("Price Alerts").unwrap();
        assert!(ath_at < price_at);
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let alerts: Vec<Alert> = (0..200).map(|_| drawdown_alert()).collect();
        let msg = format_message(&alerts, now(), "Crypto Alert Bot");

        assert_eq!(msg.description.chars().count(), DESCRIPTION_LIMIT);
        assert!(msg.description.ends_with("(truncated)"));
    }

    #[test]
    fn payload_carries_a_single_embed() {
        let payload = format_message(&[target_alert()], now(), "Crypto Alert Bot").to_payload();

        assert_eq!(payload["embeds"].as_array().unwrap().len(), 1);
        assert_eq!(payload["embeds"][0]["color"], COLOR_TARGET);
        assert_eq!(
            payload["embeds"][0]["footer"]["text"],
            "Crypto Alert Bot • 2026-10-19 08:30:00 UTC"
        );
        assert_eq!(payload["username"], "Crypto Alert Bot");
    }
}

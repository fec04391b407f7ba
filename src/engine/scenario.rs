//! Roleplay scenario inference from normalized input.

use serde::{Deserialize, Serialize};

/// The closed set of roleplay tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Price,
    Payment,
    Trade,
    Think,
    Shop,
    Spouse,
    PaymentVsPrice,
    Timing,
    Budget,
}

impl Scenario {
    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Price => "price",
            Scenario::Payment => "payment",
            Scenario::Trade => "trade",
            Scenario::Think => "think",
            Scenario::Shop => "shop",
            Scenario::Spouse => "spouse",
            Scenario::PaymentVsPrice => "paymentvsprice",
            Scenario::Timing => "timing",
            Scenario::Budget => "budget",
        }
    }
}

/// Map normalized text to a scenario tag.
///
/// Substring checks against a fixed ordered list; first match wins. The
/// order is part of the contract — the budget pattern is deliberately last
/// so it only fires when no more specific trigger matched.
pub fn infer_scenario(normalized: &str) -> Option<Scenario> {
    let t = normalized;
    if t.contains("!priceobjection") || t.contains("!roleplay price") {
        return Some(Scenario::Price);
    }
    if t.contains("!paymenttoohigh") || t.contains("!roleplay payment") {
        return Some(Scenario::Payment);
    }
    if t.contains("!tradevalue") || t.contains("!roleplay trade") {
        return Some(Scenario::Trade);
    }
    if t.contains("!thinkaboutit") {
        return Some(Scenario::Think);
    }
    if t.contains("!shoparound") {
        return Some(Scenario::Shop);
    }
    if t.contains("!spouse") {
        return Some(Scenario::Spouse);
    }
    if t.contains("!paymentvsprice") {
        return Some(Scenario::PaymentVsPrice);
    }
    if t.contains("!timingstall") {
        return Some(Scenario::Timing);
    }
    if t.contains("!roleplay budget") || (t.starts_with("!roleplay") && t.contains("budget")) {
        return Some(Scenario::Budget);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roleplay_triggers() {
        assert_eq!(infer_scenario("!roleplay price"), Some(Scenario::Price));
        assert_eq!(infer_scenario("!roleplay payment"), Some(Scenario::Payment));
        assert_eq!(infer_scenario("!roleplay trade"), Some(Scenario::Trade));
        assert_eq!(infer_scenario("!roleplay budget"), Some(Scenario::Budget));
    }

    #[test]
    fn objection_style_triggers() {
        assert_eq!(infer_scenario("!priceobjection"), Some(Scenario::Price));
        assert_eq!(infer_scenario("!thinkaboutit"), Some(Scenario::Think));
        assert_eq!(infer_scenario("!shoparound"), Some(Scenario::Shop));
        assert_eq!(infer_scenario("!spouse"), Some(Scenario::Spouse));
        assert_eq!(infer_scenario("!paymentvsprice"), Some(Scenario::PaymentVsPrice));
        assert_eq!(infer_scenario("!timingstall"), Some(Scenario::Timing));
    }

    #[test]
    fn order_is_first_match_wins() {
        // A roleplay line mentioning budget only reaches the budget arm when
        // nothing earlier matched.
        assert_eq!(
            infer_scenario("!roleplay price on a budget"),
            Some(Scenario::Price)
        );
        assert_eq!(
            infer_scenario("!roleplay tight budget customer"),
            Some(Scenario::Budget)
        );
    }

    #[test]
    fn free_text_matches_nothing() {
        assert_eq!(infer_scenario("we're at 480"), None);
        assert_eq!(infer_scenario("!dailylog"), None);
    }
}

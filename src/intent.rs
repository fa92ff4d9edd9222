//! Structured intent extracted from market question text.
//!
//! Price-model and count-model adapters need a symbol/target/direction before
//! they can run. `IntentParser` is the seam; `KeywordIntentParser` is a
//! lightweight implementation covering the common question phrasings.

use serde::{Deserialize, Serialize};

use crate::domain::MarketQuery;
use crate::models::PriceDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Crypto,
    Equity,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Crypto => "crypto",
            AssetClass::Equity => "equity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountMetric {
    Views,
    Posts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTarget {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub target: f64,
    pub direction: PriceDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountTarget {
    pub metric: CountMetric,
    /// Who or what is being counted, as named in the question
    pub subject: String,
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketIntent {
    PriceTarget(PriceTarget),
    CountTarget(CountTarget),
}

/// Extracts structured intent from a market question
pub trait IntentParser: Send + Sync {
    fn parse(&self, query: &MarketQuery) -> Option<MarketIntent>;

    fn price_target(&self, query: &MarketQuery) -> Option<PriceTarget> {
        match self.parse(query)? {
            MarketIntent::PriceTarget(t) => Some(t),
            MarketIntent::CountTarget(_) => None,
        }
    }

    fn count_target(&self, query: &MarketQuery) -> Option<CountTarget> {
        match self.parse(query)? {
            MarketIntent::CountTarget(t) => Some(t),
            MarketIntent::PriceTarget(_) => None,
        }
    }
}

const CRYPTO_SYMBOLS: &[(&str, &str)] = &[
    ("bitcoin", "BTC"),
    ("btc", "BTC"),
    ("ethereum", "ETH"),
    ("eth", "ETH"),
    ("ether", "ETH"),
    ("solana", "SOL"),
    ("sol", "SOL"),
    ("xrp", "XRP"),
    ("ripple", "XRP"),
    ("dogecoin", "DOGE"),
    ("doge", "DOGE"),
    ("cardano", "ADA"),
];

const EQUITY_SYMBOLS: &[(&str, &str)] = &[
    ("s&p", "SPX"),
    ("spx", "SPX"),
    ("nasdaq", "NDX"),
    ("tesla", "TSLA"),
    ("tsla", "TSLA"),
    ("apple", "AAPL"),
    ("aapl", "AAPL"),
    ("nvidia", "NVDA"),
    ("nvda", "NVDA"),
    ("microsoft", "MSFT"),
    ("msft", "MSFT"),
];

// Anything without a downside keyword is read as an upside target
const BELOW_WORDS: &[&str] = &["below", "under", "dip", "drop", "fall", "lower", "less"];
const VIEW_WORDS: &[&str] = &["views", "view"];
// Post counts need a counting phrase: "<n> tweets" or "post <n> times"
const POST_NOUNS: &[&str] = &["tweets", "tweet", "posts"];
const POST_VERBS: &[&str] = &["post", "tweet"];
const MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep",
    "sept", "oct", "nov", "dec",
];

#[derive(Debug, Clone, Copy, PartialEq)]
struct NumberToken {
    value: f64,
    dollar: bool,
    scaled: bool,
}

/// Keyword / number heuristics over the question text
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordIntentParser;

impl KeywordIntentParser {
    pub fn new() -> Self {
        Self
    }

    fn words(question: &str) -> Vec<String> {
        question
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric() && c != '&' && c != '$' && c != '+')
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect()
    }

    fn parse_number(word: &str, next: Option<&str>) -> Option<NumberToken> {
        let dollar = word.starts_with('$');
        let body = word.trim_start_matches('$').trim_end_matches('+').replace(',', "");

        let (digits, mut multiplier) = match body.chars().last()? {
            'k' => (&body[..body.len() - 1], 1e3),
            'm' => (&body[..body.len() - 1], 1e6),
            'b' => (&body[..body.len() - 1], 1e9),
            _ => (body.as_str(), 1.0),
        };
        let value: f64 = digits.parse().ok()?;

        match next {
            Some("thousand") => multiplier = 1e3,
            Some("million") => multiplier = 1e6,
            Some("billion") => multiplier = 1e9,
            _ => {}
        }

        Some(NumberToken {
            value: value * multiplier,
            dollar,
            scaled: multiplier > 1.0,
        })
    }

    /// Pick the target: a dollar amount first, then a scaled amount, then the
    /// first number that is not a day-of-month or a year.
    fn target_number(words: &[String]) -> Option<f64> {
        let mut candidates = Vec::new();
        for (i, word) in words.iter().enumerate() {
            let next = words.get(i + 1).map(String::as_str);
            if let Some(token) = Self::parse_number(word, next) {
                let after_month = i > 0 && MONTHS.contains(&words[i - 1].as_str());
                let looks_like_year = !token.dollar
                    && !token.scaled
                    && token.value.fract() == 0.0
                    && (2000.0..=2100.0).contains(&token.value);
                candidates.push((token, after_month || looks_like_year));
            }
        }

        candidates
            .iter()
            .find(|(t, _)| t.dollar)
            .or_else(|| candidates.iter().find(|(t, _)| t.scaled))
            .or_else(|| candidates.iter().find(|(_, skip)| !skip))
            .map(|(t, _)| t.value)
            .filter(|v| *v > 0.0)
    }

    fn direction(words: &[String]) -> PriceDirection {
        if words.iter().any(|w| BELOW_WORDS.contains(&w.as_str())) {
            PriceDirection::Below
        } else {
            PriceDirection::Above
        }
    }

    fn symbol(words: &[String]) -> Option<(String, AssetClass)> {
        for word in words {
            if let Some((_, sym)) = CRYPTO_SYMBOLS.iter().find(|(name, _)| name == word) {
                return Some((sym.to_string(), AssetClass::Crypto));
            }
            if let Some((_, sym)) = EQUITY_SYMBOLS.iter().find(|(name, _)| name == word) {
                return Some((sym.to_string(), AssetClass::Equity));
            }
        }
        None
    }

    fn is_number(word: &str) -> bool {
        Self::parse_number(word, None).is_some()
    }

    fn counts_posts(words: &[String]) -> bool {
        let counted_noun = words
            .windows(2)
            .any(|w| Self::is_number(&w[0]) && POST_NOUNS.contains(&w[1].as_str()));
        let verb_times = words.windows(3).any(|w| {
            POST_VERBS.contains(&w[0].as_str()) && Self::is_number(&w[1]) && w[2] == "times"
        });
        counted_noun || verb_times
    }

    fn subject(question: &str) -> String {
        let mut tokens = question.split_whitespace().peekable();
        if tokens
            .peek()
            .map(|t| t.eq_ignore_ascii_case("will"))
            .unwrap_or(false)
        {
            tokens.next();
        }
        let subject: Vec<&str> = tokens
            .take_while(|t| t.chars().next().map(char::is_uppercase).unwrap_or(false))
            .collect();
        subject.join(" ").trim_end_matches("'s").to_string()
    }
}

impl IntentParser for KeywordIntentParser {
    fn parse(&self, query: &MarketQuery) -> Option<MarketIntent> {
        let words = Self::words(&query.question);

        let metric = if words.iter().any(|w| VIEW_WORDS.contains(&w.as_str())) {
            Some(CountMetric::Views)
        } else if Self::counts_posts(&words) {
            Some(CountMetric::Posts)
        } else {
            None
        };

        if let Some(metric) = metric {
            let subject = Self::subject(&query.question);
            if !subject.is_empty() {
                let target = Self::target_number(&words)?;
                return Some(MarketIntent::CountTarget(CountTarget {
                    metric,
                    subject,
                    target,
                }));
            }
        }

        let (symbol, asset_class) = Self::symbol(&words)?;
        let target = Self::target_number(&words)?;
        Some(MarketIntent::PriceTarget(PriceTarget {
            symbol,
            asset_class,
            target,
            direction: Self::direction(&words),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(question: &str) -> Option<MarketIntent> {
        KeywordIntentParser::new().parse(&MarketQuery::new(question, "id"))
    }

    #[test]
    fn crypto_price_target() {
        let intent = parse("Will Bitcoin reach $110,000 by March 31, 2026?").unwrap();
        assert_eq!(
            intent,
            MarketIntent::PriceTarget(PriceTarget {
                symbol: "BTC".into(),
                asset_class: AssetClass::Crypto,
                target: 110_000.0,
                direction: PriceDirection::Above,
            })
        );
    }

    #[test]
    fn below_target_with_suffix() {
        match parse("Will ETH dip below 2.5k in October?").unwrap() {
            MarketIntent::PriceTarget(t) => {
                assert_eq!(t.symbol, "ETH");
                assert_eq!(t.direction, PriceDirection::Below);
                assert!((t.target - 2_500.0).abs() < 1e-9);
            }
            other => panic!("unexpected intent {:?}", other),
        }
    }

    #[test]
    fn equity_symbol() {
        let target = KeywordIntentParser
            .price_target(&MarketQuery::new("Will Tesla close above $300 on Friday?", "id"))
            .unwrap();
        assert_eq!(target.symbol, "TSLA");
        assert_eq!(target.asset_class, AssetClass::Equity);
        assert_eq!(target.target, 300.0);
    }

    #[test]
    fn view_count_target() {
        match parse("Will MrBeast's next video get 100M views by Friday?").unwrap() {
            MarketIntent::CountTarget(t) => {
                assert_eq!(t.metric, CountMetric::Views);
                assert_eq!(t.target, 100e6);
                assert_eq!(t.subject, "MrBeast");
            }
            other => panic!("unexpected intent {:?}", other),
        }
    }

    #[test]
    fn post_count_skips_dates() {
        let target = KeywordIntentParser
            .count_target(&MarketQuery::new(
                "Will Elon Musk post 300+ tweets from October 10 to October 17?",
                "id",
            ))
            .unwrap();
        assert_eq!(target.metric, CountMetric::Posts);
        assert_eq!(target.target, 300.0);
        assert_eq!(target.subject, "Elon Musk");
    }

    #[test]
    fn post_verb_with_times() {
        let target = KeywordIntentParser
            .count_target(&MarketQuery::new("Will Elon Musk tweet 50 times today?", "id"))
            .unwrap();
        assert_eq!(target.metric, CountMetric::Posts);
        assert_eq!(target.target, 50.0);
    }

    #[test]
    fn stray_post_words_do_not_route_to_counts() {
        let target = KeywordIntentParser
            .price_target(&MarketQuery::new(
                "Will Bitcoin post a close above $100k in 2026?",
                "id",
            ))
            .unwrap();
        assert_eq!(target.symbol, "BTC");
        assert!(parse("Will the Lakers win 10 times in a row?").is_none());
    }

    #[test]
    fn unrelated_question_has_no_intent() {
        assert!(parse("Will the Lakers beat the Celtics?").is_none());
    }
}

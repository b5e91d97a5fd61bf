//! Positional decoding of the SMS data string.
//!
//! Layout, by byte offset: `[0]` nonce, `[1]` main choice digit,
//! `[2..5]` representative code, `[5..7]` charity code. e.g. `q1RBRAB`.
//!
//! Decoding never fails. Anything missing or unrecognised resolves to a
//! sentinel so that the donation attached to the SMS is still recorded.

use std::ops::Range;

use crate::catalog::Catalogs;

pub const NO_CHOICE: u8 = 0;
pub const NO_REPRESENTATIVE: &str = "XXX";
pub const NO_CHARITY: &str = "XX";
pub const MAX_MAIN_CHOICE: u8 = 3;

const MAIN_CHOICE_INDEX: usize = 1;
const REPRESENTATIVE_WINDOW: Range<usize> = 2..5;
const CHARITY_WINDOW: Range<usize> = 5..7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedChoices {
    pub main_choice: u8,
    pub representative_choice: String,
    pub charity_choice: String,
    /// Set once the payload reaches through the representative window.
    /// Gates the demographic lookup only.
    pub complete: bool,
}

pub fn decode(payload: &str, catalogs: &Catalogs) -> DecodedChoices {
    let main_choice = payload
        .as_bytes()
        .get(MAIN_CHOICE_INDEX)
        .and_then(|byte| char::from(*byte).to_digit(10))
        .and_then(|digit| u8::try_from(digit).ok())
        .filter(|choice| (1..=MAX_MAIN_CHOICE).contains(choice))
        .unwrap_or(NO_CHOICE);

    let representative_choice = catalog_code(payload, REPRESENTATIVE_WINDOW, |code| {
        catalogs.has_representative(code)
    })
    .unwrap_or_else(|| NO_REPRESENTATIVE.to_string());

    let charity_choice = catalog_code(payload, CHARITY_WINDOW, |code| catalogs.has_charity(code))
        .unwrap_or_else(|| NO_CHARITY.to_string());

    DecodedChoices {
        main_choice,
        representative_choice,
        charity_choice,
        complete: payload.len() >= REPRESENTATIVE_WINDOW.end,
    }
}

/// Resolves a charity from the gateway shortcode token when the payload
/// carried none.
pub fn charity_from_shortcode(shortcode: &str, catalogs: &Catalogs) -> Option<String> {
    let normalized = shortcode.trim().to_ascii_uppercase();
    catalogs.has_charity(&normalized).then_some(normalized)
}

fn catalog_code(
    payload: &str,
    window: Range<usize>,
    is_known: impl Fn(&str) -> bool,
) -> Option<String> {
    // `get` returns None for short payloads and for windows that split a
    // multi-byte character.
    let code = payload.get(window)?.to_ascii_uppercase();
    is_known(&code).then_some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Charity, Representative};

    fn catalogs() -> Catalogs {
        Catalogs::from_entries(
            vec![Representative {
                id: "YOR".to_string(),
                name: "Yvetta Ortega Ramon".to_string(),
                profession: None,
                suspended: false,
            }],
            vec![Charity {
                id: "AB".to_string(),
                name: "A Bright Future".to_string(),
            }],
        )
        .expect("valid catalogs")
    }

    #[test]
    fn short_payloads_resolve_to_sentinels() {
        let catalogs = catalogs();
        for payload in ["", "n"] {
            let decoded = decode(payload, &catalogs);
            assert_eq!(decoded.main_choice, NO_CHOICE);
            assert_eq!(decoded.representative_choice, NO_REPRESENTATIVE);
            assert_eq!(decoded.charity_choice, NO_CHARITY);
            assert!(!decoded.complete);
        }
    }

    #[test]
    fn main_choice_decodes_before_representative_window() {
        let catalogs = catalogs();
        for payload in ["n2", "n2Y", "n2YO"] {
            let decoded = decode(payload, &catalogs);
            assert_eq!(decoded.main_choice, 2, "payload {payload}");
            assert_eq!(decoded.representative_choice, NO_REPRESENTATIVE);
            assert!(!decoded.complete);
        }
    }

    #[test]
    fn out_of_range_digits_are_no_choice() {
        let catalogs = catalogs();
        for digit in ['0', '4', '5', '9'] {
            let decoded = decode(&format!("n{digit}YOR"), &catalogs);
            assert_eq!(decoded.main_choice, NO_CHOICE, "digit {digit}");
        }
        assert_eq!(decode("nxYOR", &catalogs).main_choice, NO_CHOICE);
    }

    #[test]
    fn representative_window_matches_catalog() {
        let catalogs = catalogs();

        let known = decode("n2YOR", &catalogs);
        assert_eq!(known.representative_choice, "YOR");
        assert!(known.complete);

        let lower = decode("n1yor", &catalogs);
        assert_eq!(lower.representative_choice, "YOR");

        for payload in ["n2NOR", "n2XXX"] {
            let decoded = decode(payload, &catalogs);
            assert_eq!(decoded.representative_choice, NO_REPRESENTATIVE);
            assert!(decoded.complete);
        }
    }

    #[test]
    fn charity_window_requires_both_bytes_and_catalog_entry() {
        let catalogs = catalogs();
        assert_eq!(decode("n2YORA", &catalogs).charity_choice, NO_CHARITY);
        assert_eq!(decode("n2YORAA", &catalogs).charity_choice, NO_CHARITY);
        assert_eq!(decode("n2YORAB", &catalogs).charity_choice, "AB");
        assert_eq!(decode("n2YORab", &catalogs).charity_choice, "AB");
    }

    #[test]
    fn rubbish_payload_degrades_without_panicking() {
        let catalogs = catalogs();
        let decoded = decode("nothingmeaningful", &catalogs);
        assert_eq!(decoded.main_choice, NO_CHOICE);
        assert_eq!(decoded.representative_choice, NO_REPRESENTATIVE);
        assert!(decoded.complete);

        // Multi-byte characters straddling the windows.
        let decoded = decode("n2Y€RAB", &catalogs);
        assert_eq!(decoded.main_choice, 2);
        assert_eq!(decoded.representative_choice, NO_REPRESENTATIVE);
        let decoded = decode("é", &catalogs);
        assert_eq!(decoded.main_choice, NO_CHOICE);
    }

    #[test]
    fn shortcode_fallback_requires_catalog_entry() {
        let catalogs = catalogs();
        assert_eq!(
            charity_from_shortcode(" ab ", &catalogs).as_deref(),
            Some("AB")
        );
        assert_eq!(charity_from_shortcode("ZZ", &catalogs), None);
    }
}

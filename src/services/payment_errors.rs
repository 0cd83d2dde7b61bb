//! Maps raw payment-provider failures to fixed, user-safe phrases.
//!
//! Provider text can carry card fragments, hostnames or internal codes, so
//! nothing from the input is ever echoed back: the output is always one of
//! the constants below.

pub const PAYMENT_FAILED: &str = "Payment failed";
pub const PAYMENT_FAILED_RETRY: &str =
    "Payment failed. Please try again or use a different payment method.";

const CARD_DECLINED: &str = "Card was declined";
const INSUFFICIENT_FUNDS: &str = "Insufficient funds";
const INCORRECT_CVC: &str = "Incorrect security code";
const EXPIRED_CARD: &str = "Card has expired";

fn phrase_for_code(code: &str) -> Option<&'static str> {
    let phrase = match code {
        "card_declined" => CARD_DECLINED,
        "insufficient_funds" => INSUFFICIENT_FUNDS,
        "incorrect_cvc" => INCORRECT_CVC,
        "expired_card" => EXPIRED_CARD,
        "processing_error" => "Payment processing error",
        "incorrect_number" => "Invalid card number",
        "network_error" => "Network connection error",
        "api_error" => "Payment service error",
        "rate_limit" => "Too many requests",
        "generic_decline" => "Payment was declined",
        _ => return None,
    };
    Some(phrase)
}

/// Known code wins, then message keywords, then the generic retry phrase.
/// An absent or empty message short-circuits to [`PAYMENT_FAILED`].
pub fn sanitize_payment_error(message: Option<&str>, code: Option<&str>) -> &'static str {
    let message = match message {
        Some(m) if !m.trim().is_empty() => m,
        _ => return PAYMENT_FAILED,
    };

    if let Some(phrase) = code.and_then(phrase_for_code) {
        return phrase;
    }

    let lower = message.to_lowercase();
    if lower.contains("card") && lower.contains("decline") {
        CARD_DECLINED
    } else if lower.contains("insufficient") {
        INSUFFICIENT_FUNDS
    } else if lower.contains("expired") {
        EXPIRED_CARD
    } else if lower.contains("cvc") || lower.contains("security code") {
        INCORRECT_CVC
    } else {
        PAYMENT_FAILED_RETRY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("Your card was declined"), Some("card_declined"), "Card was declined")]
    #[case(Some("Insufficient funds"), Some("insufficient_funds"), "Insufficient funds")]
    #[case(Some("Incorrect CVC"), Some("incorrect_cvc"), "Incorrect security code")]
    #[case(Some("Card expired"), Some("expired_card"), "Card has expired")]
    #[case(Some("boom"), Some("rate_limit"), "Too many requests")]
    #[case(Some("Card has expired"), Some("card_declined"), "Card was declined")]
    fn known_codes_win(
        #[case] message: Option<&str>,
        #[case] code: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(sanitize_payment_error(message, code), expected);
    }

    #[rstest]
    #[case("Your card was declined by the bank", "Card was declined")]
    #[case("Insufficient balance in account", "Insufficient funds")]
    #[case("Your payment card has expired", "Card has expired")]
    #[case("Invalid CVC number provided", "Incorrect security code")]
    #[case("wrong security code", "Incorrect security code")]
    #[case("Some internal stripe error XYZ123", PAYMENT_FAILED_RETRY)]
    fn message_patterns(#[case] message: &str, #[case] expected: &str) {
        assert_eq!(sanitize_payment_error(Some(message), Some("unknown_code")), expected);
    }

    #[test]
    fn missing_or_empty_message() {
        assert_eq!(sanitize_payment_error(None, None), PAYMENT_FAILED);
        assert_eq!(sanitize_payment_error(Some(""), Some("card_declined")), PAYMENT_FAILED);
    }

    #[test]
    fn never_leaks_digits() {
        let raw = "card number 4242...4242 declined by issuer at 10.0.0.5";
        let out = sanitize_payment_error(Some(raw), None);
        assert_eq!(out, "Card was declined");
        assert!(!out.chars().any(|c| c.is_ascii_digit()));

        let out = sanitize_payment_error(Some("Database connection failed at 192.168.1.1:5432"), None);
        assert_eq!(out, PAYMENT_FAILED_RETRY);
    }
}

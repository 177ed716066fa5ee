use convo_core::normalize::{NormalizationError, PhoneNormalizer, normalize, phones_equivalent};
use proptest::prelude::*;

/// A ten-digit national mobile number.
fn arb_national() -> impl Strategy<Value = String> {
    "5[0-9]{9}"
}

fn arb_separator() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec![" ", "-", ".", "(", ")", "/"]), 0..3)
        .prop_map(|parts| parts.concat())
}

fn arb_prefix() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["", "0", "+90", "0090", "90", "+90 ", "0 "])
}

/// Interleave `digits` with one separator after each digit.
fn format_with(digits: &str, separators: &[String]) -> String {
    digits
        .chars()
        .zip(separators.iter().cycle())
        .map(|(digit, sep)| format!("{digit}{sep}"))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    #[test]
    fn formatting_does_not_change_the_key(
        national in arb_national(),
        prefix in arb_prefix(),
        separators in prop::collection::vec(arb_separator(), 1..10),
    ) {
        let raw = format!("{prefix}{}", format_with(&national, &separators));
        let key = normalize(&raw).map_err(|err| TestCaseError::fail(format!("{raw}: {err}")))?;
        prop_assert_eq!(key.as_str(), format!("+90{national}"));
    }

    #[test]
    fn normalization_is_idempotent(raw in "[+]?[0-9 ()./-]{0,24}") {
        if let Ok(key) = normalize(&raw) {
            let again = normalize(key.as_str()).map_err(|err| TestCaseError::fail(err.to_string()))?;
            prop_assert_eq!(again, key);
        }
    }

    #[test]
    fn keys_are_e164_shaped(raw in "[+]?[0-9 -]{0,20}") {
        if let Ok(key) = normalize(&raw) {
            let digits = key.digits();
            prop_assert!(key.as_str().starts_with('+'));
            prop_assert!(digits.chars().all(|c| c.is_ascii_digit()));
            prop_assert!((10..=15).contains(&digits.len()), "{}", key);
        }
    }

    #[test]
    fn punctuation_only_is_empty(raw in "[ ()./-]{0,12}") {
        prop_assert!(
            matches!(normalize(&raw), Err(NormalizationError::Empty { .. })),
            "punctuation-only input must be rejected as empty"
        );
    }

    #[test]
    fn extension_suffixes_are_dropped(
        national in arb_national(),
        suffix in prop::sample::select(vec![" ext. 12", "x99", " #4", ";ext=7", ", 3"]),
    ) {
        let plain = format!("0{national}");
        let with_extension = format!("{plain}{suffix}");
        prop_assert!(phones_equivalent(&plain, &with_extension));
    }

    #[test]
    fn configured_country_code_is_applied(national in arb_national(), code in "[1-9][0-9]{0,2}") {
        let normalizer = PhoneNormalizer::new(&code).map_err(|err| TestCaseError::fail(err.to_string()))?;
        let key = normalizer
            .normalize(&format!("0{national}"))
            .map_err(|err| TestCaseError::fail(err.to_string()))?;
        prop_assert_eq!(key.as_str(), format!("+{code}{national}"));
    }
}

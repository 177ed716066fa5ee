use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use convo_core::matcher::{DuplicateMatcher, find_duplicate_groups};
use convo_core::model::{Channel, ConversationRecord};
use proptest::prelude::*;

/// How a national number is written in a record.
#[derive(Debug, Clone, Copy)]
enum Spelling {
    Trunk,
    International,
    Spaced,
    Dashed,
}

fn spell(national: &str, spelling: Spelling) -> String {
    match spelling {
        Spelling::Trunk => format!("0{national}"),
        Spelling::International => format!("+90{national}"),
        Spelling::Spaced => format!("0{} {} {}", &national[..3], &national[3..6], &national[6..]),
        Spelling::Dashed => format!("+90 {}-{}-{}", &national[..3], &national[3..6], &national[6..]),
    }
}

fn arb_spelling() -> impl Strategy<Value = Spelling> {
    prop::sample::select(vec![
        Spelling::Trunk,
        Spelling::International,
        Spelling::Spaced,
        Spelling::Dashed,
    ])
}

fn phone_record(index: usize, national: &str, spelling: Spelling) -> ConversationRecord {
    ConversationRecord::new(
        format!("c{index:03}"),
        Channel::Whatsapp,
        spell(national, spelling),
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    )
}

/// Pairwise distinct national numbers, each with the spelling its record uses.
fn arb_distinct_numbers() -> impl Strategy<Value = Vec<(String, Spelling)>> {
    prop::collection::hash_set("5[0-9]{9}", 0..40).prop_flat_map(|numbers| {
        let numbers: Vec<String> = numbers.into_iter().collect();
        let len = numbers.len();
        prop::collection::vec(arb_spelling(), len)
            .prop_map(move |spellings| numbers.iter().cloned().zip(spellings).collect())
    })
}

fn records_for(numbers: &[(String, Spelling)]) -> Vec<ConversationRecord> {
    numbers
        .iter()
        .enumerate()
        .map(|(index, (national, spelling))| phone_record(index, national, *spelling))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn distinct_identities_never_group(numbers in arb_distinct_numbers()) {
        let records = records_for(&numbers);
        prop_assert!(find_duplicate_groups(&records).is_empty());
        prop_assert!(DuplicateMatcher::default().partition(&records).unmatched.is_empty());
    }

    #[test]
    fn distinct_handles_and_addresses_never_group(
        handles in prop::collection::hash_set("[a-z][a-z0-9._]{2,12}", 0..20),
    ) {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut records = Vec::new();
        for (index, handle) in handles.iter().enumerate() {
            records.push(ConversationRecord::new(
                format!("ig{index}"),
                Channel::Instagram,
                handle.clone(),
                created,
            ));
            records.push(ConversationRecord::new(
                format!("em{index}"),
                Channel::Email,
                format!("{handle}@example.com"),
                created,
            ));
        }
        prop_assert!(find_duplicate_groups(&records).is_empty());
    }

    #[test]
    fn respelled_copies_form_one_group_each(
        numbers in arb_distinct_numbers(),
        picks in prop::collection::vec((any::<prop::sample::Index>(), arb_spelling()), 1..6),
    ) {
        prop_assume!(!numbers.is_empty());
        let mut records = records_for(&numbers);
        let mut duplicated = HashSet::new();
        for (offset, (pick, spelling)) in picks.into_iter().enumerate() {
            let original = pick.index(numbers.len());
            duplicated.insert(records[original].id.clone());
            let copy = phone_record(numbers.len() + offset, &numbers[original].0, spelling);
            records.push(copy);
        }

        let groups = find_duplicate_groups(&records);
        prop_assert_eq!(groups.len(), duplicated.len());
        for group in &groups {
            prop_assert!(duplicated.contains(&group.members[0]));
            prop_assert!(group.members.len() >= 2);
        }
    }
}

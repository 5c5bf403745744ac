// Property-based tests for ingest and reconciliation.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use unfriend_recon::{parse, reconcile_at, MemoryStore, NormalizedEntry, RosterStore};

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

/// Names that survive trimming unchanged.
fn arb_name() -> impl Strategy<Value = String> {
    r"[A-Za-z][A-Za-z .'-]{0,20}[A-Za-z]"
}

fn arb_unique_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(arb_name(), 1..40)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

proptest! {
    #![proptest_config(config())]

    #[test]
    fn unique_names_parse_one_to_one(names in arb_unique_names(), pad in "[ \t]{0,3}") {
        let padded: Vec<String> = names.iter().map(|n| format!("{pad}{n}{pad}")).collect();
        let raw = serde_json::to_vec(&serde_json::json!({ "friends": padded })).unwrap();

        let parsed = parse(&raw).unwrap();
        prop_assert_eq!(parsed.len(), names.len());
        let got: Vec<&str> = parsed.iter().map(|e| e.name.as_str()).collect();
        let want: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn repeated_names_collapse_to_first(names in arb_unique_names(), repeat in 1usize..4) {
        let mut doc = Vec::new();
        for round in 0..repeat {
            for (i, name) in names.iter().enumerate() {
                doc.push(serde_json::json!({ "name": name, "timestamp": round * 1000 + i }));
            }
        }
        let raw = serde_json::to_vec(&doc).unwrap();

        let parsed = parse(&raw).unwrap();
        prop_assert_eq!(parsed.len(), names.len());
        for (i, entry) in parsed.iter().enumerate() {
            prop_assert_eq!(entry.timestamp, i as i64);
        }
    }

    #[test]
    fn active_count_tracks_latest_roster(
        uploads in prop::collection::vec(prop::collection::btree_set("[A-H]", 1..8), 1..6)
    ) {
        let mut store = MemoryStore::new();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for (i, names) in uploads.iter().enumerate() {
            let entries: Vec<NormalizedEntry> =
                names.iter().map(|n| NormalizedEntry::new(n.clone(), 0)).collect();
            let history_before = store.history_len().unwrap();

            let outcome = reconcile_at(&mut store, &entries, "prop", start + Duration::days(i as i64)).unwrap();

            prop_assert_eq!(store.count_active().unwrap(), names.len());
            prop_assert_eq!(store.history_len().unwrap(), history_before + 1);
            prop_assert!(outcome.added.iter().all(|n| names.contains(n)));
            prop_assert!(outcome.removed.iter().all(|n| !names.contains(n)));

            // Same upload again changes nothing.
            let again = reconcile_at(&mut store, &entries, "prop", start + Duration::days(i as i64)).unwrap();
            prop_assert!(again.is_unchanged());
        }
    }
}

use bson::doc;
use docbridge::document::get_int;
use docbridge::query::{FindOptions, build_index_spec, build_update, parse_document};
use docbridge::server::{Filter, MemoryServer};
use docbridge::Operator;
use proptest::prelude::*;

fn key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}"
}

proptest! {
    #[test]
    fn prop_parse_keeps_key_order(keys in proptest::collection::btree_set(key(), 1..12), seed in any::<u64>()) {
        // Reorder the unique keys deterministically away from sorted order.
        let mut keys: Vec<String> = keys.into_iter().collect();
        let shift = (seed as usize) % keys.len();
        keys.rotate_left(shift);
        let body: Vec<String> = keys.iter().enumerate().map(|(i, k)| format!("\"{k}\": {i}")).collect();
        let parsed = parse_document(&format!("{{{}}}", body.join(", "))).unwrap();
        let got: Vec<&String> = parsed.keys().collect();
        prop_assert_eq!(got, keys.iter().collect::<Vec<_>>());
    }

    #[test]
    fn prop_update_is_a_set_upsert(field in key(), value in any::<i32>(), id in any::<i32>()) {
        let spec = build_update(&format!("{{\"node_id\": {id}}}"), &format!("{{\"{field}\": {value}}}")).unwrap();
        prop_assert!(spec.upsert());
        let set = spec.update.get_document("$set").unwrap();
        prop_assert_eq!(set.len(), 1);
        prop_assert_eq!(get_int(set, &field), Some(i64::from(value)));
    }

    #[test]
    fn prop_index_name_follows_key_and_direction(field in key(), ascending in any::<bool>(), unique in any::<bool>()) {
        let model = build_index_spec(&field, ascending, unique);
        let dir = if ascending { 1 } else { -1 };
        prop_assert_eq!(model.options.name, format!("{field}_{dir}"));
        prop_assert_eq!(model.keys.get_i32(&field).unwrap(), dir);
        prop_assert_eq!(model.options.unique, unique);
    }

    #[test]
    fn prop_range_filter_agrees_with_comparison(v in any::<i64>(), lo in any::<i32>(), hi in any::<i32>()) {
        let filter = Filter::compile(&doc! { "n": { "$gte": lo, "$lt": hi } }).unwrap();
        let expected = v >= i64::from(lo) && v < i64::from(hi);
        prop_assert_eq!(filter.matches(&doc! { "n": v }), expected);
    }

    #[test]
    fn prop_nin_is_the_negation_of_in(v in 0i32..20, set in proptest::collection::vec(0i32..20, 0..6)) {
        let within = Filter::compile(&doc! { "n": { "$in": set.clone() } }).unwrap();
        let outside = Filter::compile(&doc! { "n": { "$nin": set } }).unwrap();
        let d = doc! { "n": v };
        prop_assert_ne!(within.matches(&d), outside.matches(&d));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_sorted_find_is_non_decreasing(v in proptest::collection::vec((0i64..5, any::<i64>()), 0..40), batch in 1u32..8) {
        let server = MemoryServer::start().unwrap();
        let mut op = Operator::new();
        op.init(&server.uri(), "prop", "sorted").unwrap();
        for (a, b) in &v {
            op.insert(&format!("{{\"a\": {a}, \"b\": {b}}}")).unwrap();
        }
        let options = FindOptions {
            batch_size: Some(batch),
            sort: Some(doc! { "a": 1, "b": 1 }),
            ..FindOptions::default()
        };
        op.select_with("{}", &options).unwrap();
        let docs: Vec<_> = std::iter::from_fn(|| op.read()).collect();
        prop_assert_eq!(docs.len(), v.len());
        for w in docs.windows(2) {
            let (a0, b0) = (get_int(&w[0], "a").unwrap(), get_int(&w[0], "b").unwrap());
            let (a1, b1) = (get_int(&w[1], "a").unwrap(), get_int(&w[1], "b").unwrap());
            prop_assert!(a0 < a1 || (a0 == a1 && b0 <= b1));
        }
    }
}

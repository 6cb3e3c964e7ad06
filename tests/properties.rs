//! Property tests for the invariants the language promises about values and
//! the sequence builtins.

use proptest::prelude::*;

use lispcalc::builtins::Builtin;
use lispcalc::value::Value;

fn apply(builtin: Builtin, args: Vec<Value>) -> Value {
    let mut sink = Vec::new();
    builtin
        .apply(args, &mut sink)
        .unwrap_or_else(|err| panic!("builtin {} failed: {err}", builtin.name()))
}

/// Strategy for arbitrary values of every kind except closures and structs,
/// nested up to two list levels deep.
fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<f64>().prop_filter("NaN breaks reflexivity", |v| !v.is_nan()).prop_map(Value::Num),
        any::<bool>().prop_map(Value::Bool),
        "[a-z]{0,8}".prop_map(Value::Str),
        Just(Value::Null),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Value::List)
    })
}

proptest! {
    #[test]
    fn equality_is_reflexive(value in arb_value()) {
        prop_assert_eq!(
            apply(Builtin::Eq, vec![value.clone(), value.clone()]),
            Value::Bool(true)
        );
    }

    #[test]
    fn equality_is_symmetric(a in arb_value(), b in arb_value()) {
        let ab = apply(Builtin::Eq, vec![a.clone(), b.clone()]);
        let ba = apply(Builtin::Eq, vec![b, a]);
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn equality_is_total(a in arb_value(), b in arb_value()) {
        // Every pair yields a bool, never an error.
        prop_assert!(matches!(apply(Builtin::Eq, vec![a, b]), Value::Bool(_)));
    }

    #[test]
    fn ord_inverts_chr_on_ascii(code in 0u32..=127) {
        let chr = apply(Builtin::Chr, vec![Value::Num(code as f64)]);
        prop_assert_eq!(apply(Builtin::Ord, vec![chr]), Value::Num(code as f64));
    }

    #[test]
    fn nth_recovers_every_element(items in prop::collection::vec(any::<i32>(), 0..16)) {
        let list = Value::List(items.iter().map(|&v| Value::Num(v as f64)).collect());
        for (index, &expected) in items.iter().enumerate() {
            let got = apply(Builtin::Nth, vec![Value::Num(index as f64), list.clone()]);
            prop_assert_eq!(got, Value::Num(expected as f64));
        }
        // One past the end is null.
        prop_assert_eq!(
            apply(Builtin::Nth, vec![Value::Num(items.len() as f64), list]),
            Value::Null
        );
    }

    #[test]
    fn insert_places_the_value_at_the_clamped_index(
        items in prop::collection::vec(any::<i32>(), 0..12),
        index in -20i32..32,
    ) {
        let list = Value::List(items.iter().map(|&v| Value::Num(v as f64)).collect());
        let inserted = apply(
            Builtin::Insert,
            vec![Value::Num(index as f64), Value::Str("marker".to_string()), list],
        );
        let clamped = index.clamp(0, items.len() as i32) as f64;
        let got = apply(Builtin::Nth, vec![Value::Num(clamped), inserted.clone()]);
        prop_assert_eq!(got, Value::Str("marker".to_string()));
        match inserted {
            Value::List(new_items) => prop_assert_eq!(new_items.len(), items.len() + 1),
            other => prop_assert!(false, "insert returned {}", other.kind_name()),
        }
    }

    #[test]
    fn length_matches_list_size(items in prop::collection::vec(any::<bool>(), 0..24)) {
        let list = Value::List(items.iter().map(|&v| Value::Bool(v)).collect());
        prop_assert_eq!(
            apply(Builtin::Length, vec![list]),
            Value::Num(items.len() as f64)
        );
    }
}

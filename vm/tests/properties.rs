//! Property tests for the path codec and operator promotion rules.

use proptest::prelude::*;
use skein_types::{Component, Path, Value};
use skein_vm::NativeOp;

fn component() -> impl Strategy<Value = Component> {
    prop_oneof![
        (0usize..200).prop_map(Component::Index),
        "[a-z][a-z0-9_-]{0,8}".prop_map(Component::Name),
        Just(Component::to_parent()),
    ]
}

fn path() -> impl Strategy<Value = Path> {
    (proptest::collection::vec(component(), 0..8), any::<bool>())
        .prop_map(|(components, relative)| Path::new(components, relative))
}

proptest! {
    #[test]
    fn path_string_form_round_trips(p in path()) {
        let reparsed = Path::from_str(&p.to_string());
        prop_assert_eq!(reparsed, p);
    }

    #[test]
    fn appending_an_absolute_path_replaces(base in path(), abs in path()) {
        prop_assume!(!abs.is_relative());
        prop_assert_eq!(base.appended(&abs), abs);
    }

    #[test]
    fn int_arithmetic_stays_int(a in -10_000i64..10_000, b in -10_000i64..10_000) {
        let sum = NativeOp::Add.call(&[Value::Int(a), Value::Int(b)]).unwrap();
        prop_assert_eq!(sum, Value::Int(a + b));
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float(a in -10_000i64..10_000, f in -1.0e6f64..1.0e6) {
        let sum = NativeOp::Add.call(&[Value::Int(a), Value::Float(f)]).unwrap();
        prop_assert!(matches!(sum, Value::Float(_)));
        let product = NativeOp::Multiply.call(&[Value::Float(f), Value::Int(a)]).unwrap();
        prop_assert!(matches!(product, Value::Float(_)));
    }

    #[test]
    fn division_by_zero_always_fails(a in any::<i64>()) {
        prop_assert!(NativeOp::Divide.call(&[Value::Int(a), Value::Int(0)]).is_err());
        prop_assert!(NativeOp::Mod.call(&[Value::Int(a), Value::Int(0)]).is_err());
    }

    #[test]
    fn comparison_operators_agree_with_ordering(a in -1000i64..1000, b in -1000i64..1000) {
        let less = NativeOp::Less.call(&[Value::Int(a), Value::Int(b)]).unwrap();
        let greater = NativeOp::Greater.call(&[Value::Int(a), Value::Int(b)]).unwrap();
        let eq = NativeOp::Equal.call(&[Value::Int(a), Value::Int(b)]).unwrap();
        prop_assert_eq!(less, Value::Bool(a < b));
        prop_assert_eq!(greater, Value::Bool(a > b));
        prop_assert_eq!(eq, Value::Bool(a == b));
    }

    #[test]
    fn string_concat_matches_canonical_casts(a in "[a-z]{0,6}", b in -100i64..100) {
        let joined = NativeOp::Add.call(&[Value::Str(a.clone()), Value::Int(b)]).unwrap();
        prop_assert_eq!(joined, Value::Str(format!("{a}{b}")));
    }
}

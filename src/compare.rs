//! Equality comparators for derived-stream change suppression.

use crate::value::Value;

/// Identity comparison ([`Value::identical`]): the default comparator.
pub fn identical(a: &Value, b: &Value) -> bool {
    a.identical(b)
}

/// Deep structural equality.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    a == b
}

/// Shallow equality: containers match when they have the same keys/length and
/// every entry is [`identical`]; scalars fall back to identity comparison.
pub fn shallow_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| match y.get(k) {
                    Some(w) => v.identical(w),
                    None => false,
                })
        }
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(v, w)| v.identical(w))
        }
        _ => a.identical(b),
    }
}

/// Collections compare equal when they have the same length; everything else
/// falls back to identity comparison. Useful for selectors that only care
/// about a collection growing or shrinking.
pub fn same_length(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) => x.len() == y.len(),
        (Value::Map(x), Value::Map(y)) => x.len() == y.len(),
        _ => a.identical(b),
    }
}

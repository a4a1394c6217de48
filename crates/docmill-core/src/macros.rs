///
/// value!
///
/// Inline construction of [`Value`](crate::value::Value) trees, mirroring the
/// JSON literal shape:
///
/// ```ignore
/// value!(null)                  → Value::Null
/// value!(absent)                → Value::Absent
/// value!(42)                    → Value::Int(42)
/// value!("a")                   → Value::Text("a")
/// value!([1, 2, (-3)])          → Value::Array(..)
/// value!({"a": 1, "b": [2]})    → Value::Object(..)
/// ```
///
/// Negative literals inside arrays/objects need parentheses; a bare `-1` is
/// two tokens to the matcher.
///

#[macro_export]
macro_rules! value {
    (null) => {
        $crate::value::Value::Null
    };

    (absent) => {
        $crate::value::Value::Absent
    };

    (true) => {
        $crate::value::Value::Bool(true)
    };

    (false) => {
        $crate::value::Value::Bool(false)
    };

    ([ $($elem:tt),* $(,)? ]) => {
        $crate::value::Value::Array(vec![ $( $crate::value!($elem) ),* ])
    };

    ({ $($key:tt : $val:tt),* $(,)? }) => {{
        #[allow(unused_mut)]
        let mut fields = $crate::__reexports::indexmap::IndexMap::new();
        $(
            fields.insert(($key).to_string(), $crate::value!($val));
        )*
        $crate::value::Value::Object(fields)
    }};

    ($other:expr) => {
        $crate::value::Value::from($other)
    };
}

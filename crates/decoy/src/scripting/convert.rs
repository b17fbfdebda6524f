//! Conversion between `serde_json::Value` and Boa's `JsValue`.

use boa_engine::{
    js_string, object::builtins::JsArray, property::PropertyKey, Context, JsNativeError, JsObject,
    JsResult, JsValue,
};
use serde_json::{Map, Number, Value};

/// Values nested deeper than this are rejected instead of overflowing the stack
/// on self-referencing objects.
const MAX_DEPTH: usize = 64;

/// Arrays longer than this are rejected; a script can set `length` without
/// storing any elements.
const MAX_ARRAY_LEN: f64 = 1_000_000.0;

/// Create a JavaScript object with the ordinary Object prototype.
pub(crate) fn new_object(context: &Context) -> JsObject {
    JsObject::with_object_proto(context.intrinsics())
}

pub(crate) fn json_to_js(context: &mut Context, value: &Value) -> JsResult<JsValue> {
    match value {
        Value::Null => Ok(JsValue::null()),
        Value::Bool(b) => Ok(JsValue::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(JsValue::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(JsValue::from(f))
            } else {
                Ok(JsValue::null())
            }
        }
        Value::String(s) => Ok(JsValue::from(js_string!(s.clone()))),
        Value::Array(arr) => {
            let js_arr = JsArray::new(context);
            for (i, v) in arr.iter().enumerate() {
                let js_val = json_to_js(context, v)?;
                js_arr.set(i as u32, js_val, false, context)?;
            }
            Ok(js_arr.into())
        }
        Value::Object(obj) => {
            let js_obj = new_object(context);
            for (k, v) in obj {
                let js_val = json_to_js(context, v)?;
                js_obj.set(js_string!(k.clone()), js_val, false, context)?;
            }
            Ok(js_obj.into())
        }
    }
}

pub(crate) fn js_to_json(context: &mut Context, value: &JsValue) -> JsResult<Value> {
    js_to_json_at(context, value, 0)
}

fn js_to_json_at(context: &mut Context, value: &JsValue, depth: usize) -> JsResult<Value> {
    if depth > MAX_DEPTH {
        return Err(JsNativeError::range()
            .with_message("value is nested too deeply to convert")
            .into());
    }

    if value.is_null() || value.is_undefined() {
        return Ok(Value::Null);
    }

    if let Some(b) = value.as_boolean() {
        return Ok(Value::Bool(b));
    }

    if let Some(n) = value.as_number() {
        return Ok(number_to_json(n));
    }

    if let Some(s) = value.as_string() {
        return Ok(Value::String(s.to_std_string_escaped()));
    }

    if let Some(obj) = value.as_object() {
        if obj.is_callable() {
            return Ok(Value::Null);
        }

        if obj.is_array() {
            let len = obj
                .get(js_string!("length"), context)?
                .as_number()
                .unwrap_or(0.0);
            if len > MAX_ARRAY_LEN {
                return Err(JsNativeError::range()
                    .with_message("array is too large to convert")
                    .into());
            }
            let len = len as u32;
            let mut arr = Vec::new();
            for i in 0..len {
                let item = obj.get(i, context)?;
                arr.push(js_to_json_at(context, &item, depth + 1)?);
            }
            return Ok(Value::Array(arr));
        }

        let mut map = Map::new();
        for key in obj.own_property_keys(context)? {
            let key_str = match &key {
                PropertyKey::String(s) => s.to_std_string_escaped(),
                PropertyKey::Index(i) => i.get().to_string(),
                PropertyKey::Symbol(_) => continue,
            };
            let val = obj.get(key.clone(), context)?;
            if val.is_undefined() {
                continue;
            }
            map.insert(key_str, js_to_json_at(context, &val, depth + 1)?);
        }
        return Ok(Value::Object(map));
    }

    Ok(Value::Null)
}

/// Integral numbers come back as integers so `404` stays `404`, not `404.0`.
/// NaN becomes null; JSON has no infinities, so they clamp to the largest finite value.
fn number_to_json(n: f64) -> Value {
    if n.is_nan() {
        return Value::Null;
    }
    if n.is_infinite() {
        let clamped = if n > 0.0 { f64::MAX } else { f64::MIN };
        return Number::from_f64(clamped).map_or(Value::Null, Value::Number);
    }
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;
    use serde_json::json;

    fn eval(context: &mut Context, src: &str) -> Value {
        let value = context.eval(Source::from_bytes(src)).unwrap();
        js_to_json(context, &value).unwrap()
    }

    #[test]
    fn test_integral_numbers_stay_integers() {
        let mut context = Context::default();
        assert_eq!(eval(&mut context, "404"), json!(404));
        assert_eq!(eval(&mut context, "1.5"), json!(1.5));
        assert_eq!(eval(&mut context, "NaN"), Value::Null);
    }

    #[test]
    fn test_objects_and_arrays() {
        let mut context = Context::default();
        let value = eval(
            &mut context,
            "({ statusCode: 201, headers: { 'X-A': 'b' }, list: [1, 'two', null], skip: undefined })",
        );
        assert_eq!(
            value,
            json!({"statusCode": 201, "headers": {"X-A": "b"}, "list": [1, "two", null]})
        );
    }

    #[test]
    fn test_json_round_trips_into_js() {
        let mut context = Context::default();
        let original = json!({"count": 2, "nested": {"ok": true}, "items": ["a"]});
        let js = json_to_js(&mut context, &original).unwrap();
        assert_eq!(js_to_json(&mut context, &js).unwrap(), original);
    }

    #[test]
    fn test_cyclic_object_is_rejected() {
        let mut context = Context::default();
        let value = context
            .eval(Source::from_bytes("var o = {}; o.self = o; o"))
            .unwrap();
        assert!(js_to_json(&mut context, &value).is_err());
    }

    #[test]
    fn test_oversized_array_is_rejected() {
        let mut context = Context::default();
        let value = context
            .eval(Source::from_bytes("var a = []; a.length = 4294967295; a"))
            .unwrap();
        assert!(js_to_json(&mut context, &value).is_err());

        let value = context
            .eval(Source::from_bytes("var b = []; b.length = 3; b"))
            .unwrap();
        assert_eq!(js_to_json(&mut context, &value).unwrap(), json!([null, null, null]));
    }
}

//! Built-in node implementations.
//!
//! The standard pack shipped with the engine: small data-shaping nodes
//! that plugin definition files bind to by symbol (`std.*`). Each `run`
//! takes its inputs positionally in declared port order.

use anyhow::{bail, Context};
use serde_json::json;

use super::{ExecutorTable, RunOutput};
use crate::value::Value;

/// Register the standard pack into an executor table.
pub fn install(table: &mut ExecutorTable) {
    // Pass the configured `value` param through unchanged.
    table.register_run("std.constant", |_, mut args| {
        Ok(RunOutput::Value(args.remove(0)))
    });

    // Identity: forward the single input.
    table.register_run("std.identity", |_, mut args| {
        Ok(RunOutput::Value(args.remove(0)))
    });

    // Generate `[start, start + 1, ..)` of length `count`.
    table.register_run("std.range", |_, args| {
        let count = number(&args[0], "count")? as i64;
        if count < 0 {
            bail!("count must be non-negative, got {count}");
        }
        let start = args.get(1).and_then(Value::as_f64).unwrap_or(0.0) as i64;
        let items: Vec<i64> = (start..start + count).collect();
        Ok(RunOutput::Value(Value::from_json(json!(items))))
    });

    // Multiply every element of `items` by `factor`.
    table.register_run("std.scale", |_, args| {
        let items = array(&args[0], "items")?;
        let factor = number(&args[1], "factor")?;
        let scaled: Vec<f64> = items
            .iter()
            .map(|v| number(v, "items element").map(|n| n * factor))
            .collect::<anyhow::Result<_>>()?;
        Ok(RunOutput::Value(Value::from_json(json!(scaled))))
    });

    // Sum the elements of `items`.
    table.register_run("std.sum", |_, args| {
        let items = array(&args[0], "items")?;
        let mut total = 0.0;
        for item in &items {
            total += number(item, "items element")?;
        }
        Ok(RunOutput::Value(Value::number(total)))
    });

    // Element count of an array or stack.
    table.register_run("std.count", |_, args| {
        let items = array(&args[0], "items")?;
        Ok(RunOutput::Value(Value::number(items.len() as f64)))
    });

    // a + b.
    table.register_run("std.add", |_, args| {
        let a = number(&args[0], "a")?;
        let b = number(&args[1], "b")?;
        Ok(RunOutput::Value(Value::number(a + b)))
    });

    // Apply a FUNCTION-port callable to every element of `items`.
    table.register_run("std.map", |_, args| {
        let items = array(&args[0], "items")?;
        let func = match &args[1] {
            Value::Function(f) => f.clone(),
            other => bail!("fn expects a function, got {other:?}"),
        };
        let mapped: Vec<Value> = items
            .into_iter()
            .map(|item| func.call(vec![item]))
            .collect::<anyhow::Result<_>>()
            .context("mapping function failed")?;
        Ok(RunOutput::Value(Value::Stack(mapped)))
    });
}

fn number(value: &Value, port: &str) -> anyhow::Result<f64> {
    value
        .as_f64()
        .with_context(|| format!("{port} expects a number, got {value:?}"))
}

fn array(value: &Value, port: &str) -> anyhow::Result<Vec<Value>> {
    value
        .as_array()
        .with_context(|| format!("{port} expects an array, got {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::RunContext;

    fn run(symbol: &str, args: Vec<Value>) -> anyhow::Result<RunOutput> {
        let table = ExecutorTable::with_builtins();
        let f = table.run_fn(symbol).expect("builtin symbol");
        let mut ctx = RunContext::new("test");
        f(&mut ctx, args)
    }

    fn value(output: RunOutput) -> Value {
        match output {
            RunOutput::Value(v) => v,
            other => panic!("expected single value, got {other:?}"),
        }
    }

    #[test]
    fn test_range() {
        let out = value(run("std.range", vec![Value::number(3.0), Value::Null]).unwrap());
        assert_eq!(out.as_json().unwrap(), &json!([0, 1, 2]));
    }

    #[test]
    fn test_range_rejects_negative_count() {
        assert!(run("std.range", vec![Value::number(-1.0), Value::Null]).is_err());
    }

    #[test]
    fn test_scale() {
        let items = Value::from_json(json!([1, 2, 3]));
        let out = value(run("std.scale", vec![items, Value::number(2.0)]).unwrap());
        assert_eq!(out.as_json().unwrap(), &json!([2.0, 4.0, 6.0]));
    }

    #[test]
    fn test_sum_of_stack() {
        let stack = Value::Stack(vec![
            Value::number(10.0),
            Value::number(20.0),
            Value::number(30.0),
        ]);
        let out = value(run("std.sum", vec![stack]).unwrap());
        assert_eq!(out, Value::number(60.0));
    }

    #[test]
    fn test_scale_rejects_non_array() {
        let err = run("std.scale", vec![Value::number(1.0), Value::number(2.0)]).unwrap_err();
        assert!(err.to_string().contains("expects an array"));
    }

    #[test]
    fn test_map_applies_function() {
        use crate::value::FunctionValue;
        let items = Value::from_json(json!([1, 2]));
        let square = Value::Function(FunctionValue::new("square", |mut args| {
            let x = args.remove(0).as_f64().unwrap_or(0.0);
            Ok(Value::number(x * x))
        }));
        let out = value(run("std.map", vec![items, square]).unwrap());
        assert_eq!(
            out,
            Value::Stack(vec![Value::number(1.0), Value::number(4.0)])
        );
    }
}

// Demo dispatch target
//
// A small service whose methods simulate I/O-bound work so that a batch can
// saturate the pool and exercise caller-runs.

use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use methodpool::invoke::{DiagnosticContext, Dispatch, MethodTable, ParamType, Target, Value};

pub struct Workload;

impl Target for Workload {
    fn methods(&self) -> &MethodTable<Self> {
        static TABLE: OnceLock<MethodTable<Workload>> = OnceLock::new();
        TABLE.get_or_init(|| {
            MethodTable::new()
                .method("add", [ParamType::I64, ParamType::I64], |_, args, _| {
                    Ok(Value::from(args.i64(0)? + args.i64(1)?))
                })
                .variadic("sum", [], ParamType::Number, |_, args, _| {
                    Ok(Value::from(
                        args.list(0)?.iter().filter_map(Value::as_f64).sum::<f64>(),
                    ))
                })
                .method("work", [ParamType::I64], |_, args, ctx| {
                    let millis = args.i64(0)?.max(0) as u64;
                    let until = Instant::now().checked_add(Duration::from_millis(millis));
                    while until.map_or(true, |until| Instant::now() < until) {
                        ctx.checkpoint()?;
                        thread::sleep(Duration::from_millis(10));
                    }
                    tracing::debug!(
                        batch = ctx.diagnostics().get("batch").unwrap_or("-"),
                        millis,
                        "work finished"
                    );
                    Ok(Value::Null)
                })
        })
    }
}

/// Build a mixed batch of `count` dispatches
pub fn batch(count: usize, work_millis: u64, batch_id: &str) -> Vec<Dispatch> {
    let target = Arc::new(Workload);
    let context = DiagnosticContext::new().with("batch", batch_id);

    (0..count)
        .map(|i| {
            let (method, args) = match i % 3 {
                0 => ("add", vec![Value::from(i as i64), Value::from(1i64)]),
                1 => ("sum", vec![Value::from(i as i64), Value::from(0.5f64)]),
                _ => ("work", vec![Value::from(work_millis as i64)]),
            };
            Dispatch::with_context(Arc::clone(&target), method, args, context.clone())
        })
        .collect()
}

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sagepipe::config::Settings;
use sagepipe::dag::DagEngine;
use sagepipe::models::{LambdaSpec, PropertyPath, Step, StepSpec, Value};
use sagepipe::pipeline::{create_pipeline, Pipeline};
use sagepipe::workflow::create_workflow;
use std::collections::HashMap;
use std::path::Path;

fn settings() -> Settings {
    let env: HashMap<String, String> = [
        ("SAGEMAKER_ROLE", "arn:aws:iam::123456789012:role/SageMakerRole"),
        ("WORKFLOW_ROLE", "arn:aws:iam::123456789012:role/StepFunctionsRole"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    Settings::load_with_env(Some(Path::new("/nonexistent/config.json")), env)
        .expect("settings")
}

/// Linear chain of lambda steps, each consuming the previous step's output
fn create_lambda_chain(count: usize) -> Vec<Step> {
    (0..count)
        .map(|i| {
            let payload = if i == 0 {
                vec![("value".to_string(), Value::literal(0))]
            } else {
                vec![(
                    "value".to_string(),
                    Value::step_output(
                        format!("step{}", i - 1),
                        PropertyPath::lambda_output("result"),
                    ),
                )]
            };
            Step::new(
                format!("step{}", i),
                StepSpec::Lambda(LambdaSpec {
                    function: Value::literal("arn:aws:lambda:us-east-1:123456789012:function:f"),
                    payload,
                    output_parameters: vec!["result".to_string()],
                }),
            )
        })
        .collect()
}

fn bench_definition_encoding(c: &mut Criterion) {
    let settings = settings();
    let pipeline = create_pipeline(&settings).expect("pipeline");
    let workflow = create_workflow(&settings).expect("workflow");

    c.bench_function("pipeline_definition", |b| {
        b.iter(|| black_box(pipeline.definition_string().expect("definition")))
    });
    c.bench_function("workflow_definition", |b| {
        b.iter(|| black_box(workflow.definition_string().expect("definition")))
    });
}

fn bench_graph_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_validation");

    for size in [10, 25, 50].iter() {
        let steps = create_lambda_chain(*size);
        group.bench_with_input(BenchmarkId::new("dag_build", size), &steps, |b, steps| {
            b.iter(|| DagEngine::build(black_box(steps)).expect("dag"))
        });
        group.bench_with_input(BenchmarkId::new("pipeline_new", size), &steps, |b, steps| {
            b.iter(|| Pipeline::new("bench", vec![], black_box(steps.clone())).expect("pipeline"))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_definition_encoding, bench_graph_validation);
criterion_main!(benches);

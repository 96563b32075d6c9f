use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::{json, Map, Value};
use std::hint::black_box;

use vmdm::modules::approval::flow::{conditions_hold, node_outcome};
use vmdm::modules::approval::{ApprovalNode, ApprovalTask, Assignee, ConditionRule, NodeType, PassMode, TaskResult};
use vmdm::modules::schema::{plan, FieldDefinition, NumericOptions, PrimitiveType, TableDescriptor, TableKind, TableState};

fn wide_table(columns: usize) -> Vec<FieldDefinition> {
    (0..columns)
        .map(|i| {
            let ty = match i % 4 {
                0 => PrimitiveType::Text,
                1 => PrimitiveType::Number,
                2 => PrimitiveType::Date,
                _ => PrimitiveType::DateTime,
            };
            let mut f = FieldDefinition::new("goods", format!("f{}", i), format!("字段{}", i), ty);
            if i % 8 == 1 {
                f.numeric = NumericOptions {
                    precision: Some(18),
                    scale: Some(4),
                };
            }
            f.is_index = i % 10 == 0;
            f.sort_order = i as i32;
            f
        })
        .collect()
}

fn benchmark_condition_builder(c: &mut Criterion) {
    let filter: Map<String, Value> = json!({
        "code": "SKU-001",
        "name like": "%螺丝%",
        "price >=": 10,
        "price <": 500,
        "status in": ["Normal", "Frozen"],
        "barcode": "6901\n6902\n6903"
    })
    .as_object()
    .cloned()
    .unwrap_or_default();

    c.bench_function("build_condition_6_keys", |b| {
        b.iter(|| v::build_condition(black_box(&filter)))
    });
}

fn benchmark_schema(c: &mut Criterion) {
    let fields = wide_table(60);
    c.bench_function("descriptor_build_60_fields", |b| {
        b.iter(|| TableDescriptor::build("goods", TableKind::Live, black_box(&fields)))
    });

    if let Ok(desired) = TableDescriptor::build("goods", TableKind::Live, &fields) {
        let empty = TableState::default();
        c.bench_function("plan_fresh_table_60_fields", |b| {
            b.iter(|| plan(black_box(&desired), black_box(&empty)))
        });
    }
}

fn benchmark_flow(c: &mut Criterion) {
    let rules: Vec<ConditionRule> = vec![
        ConditionRule {
            field: "amount".into(),
            op: "gt".into(),
            value: json!(1000),
        },
        ConditionRule {
            field: "category".into(),
            op: "contains".into(),
            value: json!("五金"),
        },
    ];
    let form = json!({"amount": "2500.50", "category": "五金配件"});
    c.bench_function("conditions_hold_2_rules", |b| {
        b.iter(|| conditions_hold(black_box(&rules), black_box(&form)))
    });

    let node = ApprovalNode::new("goods_flow", 1, "a1", NodeType::Approval, 1);
    let now = chrono::Utc::now().naive_utc();
    let tasks: Vec<ApprovalTask> = (0..50)
        .map(|i| {
            let who = Assignee::new(format!("u{}", i), "");
            ApprovalTask::closed("AP", &node, &who, TaskResult::Approved, now)
        })
        .collect();
    c.bench_function("node_outcome_and_50_tasks", |b| {
        b.iter(|| node_outcome(PassMode::And, black_box(tasks.iter())))
    });
}

criterion_group!(benches, benchmark_condition_builder, benchmark_schema, benchmark_flow);
criterion_main!(benches);

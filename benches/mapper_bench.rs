/*
Measures the joint-space mapper on the per-step critical path: raw map to
vector reads and absolute/delta writes for a six-joint arm, plus the clipping
branch when every component lands outside its limits.
*/

use criterion::{Criterion, criterion_group, criterion_main};

use std::collections::HashMap;
use std::hint::black_box;
use std::sync::Arc;

use arm_bridge::motion::joints::JointDescriptor;
use arm_bridge::motion::mapper::JointSpaceMapper;
use arm_bridge::utils::telemetry::EventRecorder;

fn six_joints() -> Vec<JointDescriptor> {
    vec![
        JointDescriptor::new("shoulder_pan", -110.0, 110.0),
        JointDescriptor::new("shoulder_lift", -100.0, 100.0),
        JointDescriptor::new("elbow_flex", -100.0, 90.0),
        JointDescriptor::new("wrist_flex", -95.0, 95.0),
        JointDescriptor::new("wrist_roll", -160.0, 160.0),
        JointDescriptor::new("gripper", 0.0, 100.0),
    ]
}

fn raw_positions(joints: &[JointDescriptor]) -> HashMap<String, f64> {
    joints.iter().map(|j| (j.key(), 12.5)).collect()
}

fn bench_read(c: &mut Criterion) {
    let joints = six_joints();
    let raw = raw_positions(&joints);
    let mapper = JointSpaceMapper::new(0.25, Arc::new(EventRecorder::new()));

    c.bench_function("mapper_read_6_joints", |b| {
        b.iter(|| black_box(mapper.read(black_box(&raw), &joints).unwrap()));
    });
}

fn bench_write_absolute(c: &mut Criterion) {
    let joints = six_joints();
    let mapper = JointSpaceMapper::new(0.25, Arc::new(EventRecorder::new()));
    let in_range = [10.0, -20.0, 30.0, 0.0, 90.0, 50.0];
    let out_of_range = [500.0, -500.0, 500.0, -500.0, 500.0, -500.0];

    let mut group = c.benchmark_group("mapper_write_absolute");
    group.bench_function("in_range", |b| {
        b.iter(|| black_box(mapper.write_absolute(black_box(&in_range), &joints).unwrap()));
    });
    group.bench_function("all_clipped", |b| {
        b.iter(|| {
            black_box(
                mapper
                    .write_absolute(black_box(&out_of_range), &joints)
                    .unwrap(),
            )
        });
    });
    group.finish();
}

fn bench_write_delta(c: &mut Criterion) {
    let joints = six_joints();
    let mapper = JointSpaceMapper::new(0.25, Arc::new(EventRecorder::new()));
    let action = [0.1, -0.1, 0.05, 0.0, 0.2, -0.05];
    let current = [10.0, -20.0, 30.0, 0.0, 90.0, 50.0];

    c.bench_function("mapper_write_delta_6_joints", |b| {
        b.iter(|| {
            black_box(
                mapper
                    .write_delta(black_box(&action), &joints, black_box(&current))
                    .unwrap(),
            )
        });
    });
}

criterion_group!(benches, bench_read, bench_write_absolute, bench_write_delta);
criterion_main!(benches);

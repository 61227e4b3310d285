use criterion::{criterion_group, criterion_main, Criterion};

use manip::nalgebra as na;
use manip::{
    forward_kinematics, forward_kinematics_chain, Frame, FrameTree, FrameTreeBuilder, Joint,
    JointType, Link,
};
use na::{Isometry3, Translation3, Vector3};

fn create_arm7() -> FrameTree {
    let mut builder = FrameTreeBuilder::new();
    let mut parent = builder.add_root(Frame::new(Link::new("base"), Joint::fixed("base_root")));
    let axes = [
        Vector3::y_axis(),
        Vector3::x_axis(),
        Vector3::z_axis(),
        Vector3::y_axis(),
        Vector3::z_axis(),
        Vector3::y_axis(),
        Vector3::x_axis(),
    ];
    for (i, axis) in axes.iter().enumerate() {
        let joint = Joint::new(format!("j{i}"), JointType::Revolute { axis: *axis })
            .with_origin(Isometry3::from_parts(
                Translation3::new(0.0, 0.0, 0.15),
                Default::default(),
            ));
        parent = builder.add_child(parent, Frame::new(Link::new(format!("link{i}")), joint));
    }
    builder.add_child(
        parent,
        Frame::new(
            Link::new("tool"),
            Joint::fixed("tool_fix").with_origin(Isometry3::translation(0.0, 0.0, 0.1)),
        ),
    );
    builder.finalize().unwrap()
}

fn bench_fk(c: &mut Criterion) {
    let tree = create_arm7();
    let base = Isometry3::identity();
    let q = [0.3, -0.4, 0.5, -1.0, 0.4, 0.2, -0.6];

    c.bench_function("fk_tree", |b| {
        b.iter(|| forward_kinematics(&tree, &base, &q).unwrap())
    });

    let ids = tree.chain_to("tool").unwrap();
    let chain = tree.frames_of(&ids);
    c.bench_function("fk_chain", |b| {
        b.iter(|| forward_kinematics_chain(&chain, &base, &q))
    });
}

criterion_group!(benches, bench_fk);
criterion_main!(benches);

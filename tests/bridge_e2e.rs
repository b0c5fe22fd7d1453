//! End-to-end tests against the extop-ref runtime.
//!
//! Covers:
//! - construction with and without attributes, and construction failures
//! - compute round trips for f32/f64/i32 inputs, scalars and empty tensors
//! - foreign failures surfacing the foreign message, with no outputs written
//! - string inputs and the foreign log callback
//! - early release

mod common;

use std::sync::{Arc, Mutex};

use gllm_extop::{
    Attributes, ElementType, ExternalOpDescriptor, ExtopError, Kernel, OpContext, Tensor,
};

const MODULE: &str = "extop.builtin";

fn descriptor(class: &str, inputs: Vec<ElementType>, outputs: Vec<ElementType>) -> ExternalOpDescriptor {
    ExternalOpDescriptor::new(MODULE, class, inputs, outputs)
}

fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Compute round trips
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn doubler_f32_matrix() {
    let bridge = common::ref_bridge();
    let kernel = descriptor("Doubler", vec![ElementType::F32], vec![ElementType::F32])
        .create_kernel(&bridge, &Attributes::new())
        .unwrap();

    let input = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
    let mut ctx = OpContext::new(vec![input.clone().into()], 1);
    kernel.compute(&mut ctx).unwrap();

    let out = ctx.output(0).unwrap();
    assert_eq!(out.dtype(), ElementType::F32);
    assert_eq!(out.dims(), &[2, 3]);
    assert_eq!(
        out.to_vec::<f32>().unwrap(),
        vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0]
    );
    assert_eq!(ctx.inputs()[0].as_tensor().unwrap(), &input);
}

#[test]
fn doubler_mixed_inputs() {
    let bridge = common::ref_bridge();
    let kernel = descriptor(
        "Doubler",
        vec![ElementType::F64, ElementType::I32],
        vec![ElementType::F64, ElementType::I32],
    )
    .create_kernel(&bridge, &Attributes::new())
    .unwrap();

    let mut ctx = OpContext::new(
        vec![
            Tensor::from_slice(&[0.25f64], vec![]).into(),
            Tensor::from_slice(&[-3i32, 7], vec![2]).into(),
        ],
        2,
    );
    kernel.compute(&mut ctx).unwrap();

    let scalar = ctx.output(0).unwrap();
    assert!(scalar.dims().is_empty());
    assert_eq!(scalar.to_vec::<f64>().unwrap(), vec![0.5]);
    assert_eq!(ctx.output(1).unwrap().to_vec::<i32>().unwrap(), vec![-6, 14]);
}

#[test]
fn empty_tensor_round_trip() {
    let bridge = common::ref_bridge();
    let kernel = descriptor("Identity", vec![ElementType::U8], vec![ElementType::U8])
        .create_kernel(&bridge, &Attributes::new())
        .unwrap();

    let mut ctx = OpContext::new(vec![Tensor::from_slice::<u8>(&[], vec![0, 4]).into()], 1);
    kernel.compute(&mut ctx).unwrap();
    let out = ctx.output(0).unwrap();
    assert_eq!(out.dims(), &[0, 4]);
    assert_eq!(out.len_bytes(), 0);
}

#[test]
fn scale_uses_node_attributes() {
    let bridge = common::ref_bridge();
    let desc = descriptor("Scale", vec![ElementType::F32], vec![ElementType::F32])
        .with_attributes(attrs(&[("factor", "10")]));
    let kernel = desc
        .create_kernel(&bridge, &attrs(&[("factor", "0.5")]))
        .unwrap();
    assert_eq!(kernel.attributes().get("factor").map(String::as_str), Some("0.5"));

    let mut ctx = OpContext::new(vec![Tensor::from_slice(&[4.0f32, -8.0], vec![2]).into()], 1);
    kernel.compute(&mut ctx).unwrap();
    assert_eq!(ctx.output(0).unwrap().to_vec::<f32>().unwrap(), vec![2.0, -4.0]);
}

#[test]
fn zero_inputs_zero_outputs() {
    let bridge = common::ref_bridge();
    let kernel = descriptor("Identity", vec![], vec![])
        .create_kernel(&bridge, &Attributes::new())
        .unwrap();
    let mut ctx = OpContext::new(Vec::new(), 0);
    kernel.compute(&mut ctx).unwrap();
    assert_eq!(ctx.allocated_outputs(), 0);
}

// ═══════════════════════════════════════════════════════════════════════
// Failures
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn foreign_failure_carries_message() {
    let bridge = common::ref_bridge();
    let kernel = descriptor("Failing", vec![ElementType::F32], vec![ElementType::F32])
        .create_kernel(&bridge, &Attributes::new())
        .unwrap();

    let mut ctx = OpContext::new(vec![Tensor::from_slice(&[1.0f32], vec![1]).into()], 1);
    let err = kernel.compute(&mut ctx).unwrap_err();
    match &err {
        ExtopError::InvokeFailed { compute, message } => {
            assert_eq!(compute, "compute");
            assert_eq!(message, "Failing.compute: deliberate failure");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(ctx.allocated_outputs(), 0);
}

#[test]
fn unknown_class_fails_construction() {
    let bridge = common::ref_bridge();
    let err = descriptor("NoSuchClass", vec![], vec![])
        .create_kernel(&bridge, &Attributes::new())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to construct extop.builtin.NoSuchClass: \
         module 'extop.builtin' has no class 'NoSuchClass'"
    );
    assert!(!err.is_environment());
}

#[test]
fn unknown_module_fails_construction() {
    let bridge = common::ref_bridge();
    let err = ExternalOpDescriptor::new("not.there", "Doubler", vec![], vec![])
        .create_kernel(&bridge, &Attributes::new())
        .unwrap_err();
    match err {
        ExtopError::ConstructFailed { module, message, .. } => {
            assert_eq!(module, "not.there");
            assert_eq!(message, "no module named 'not.there'");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn missing_attribute_fails_construction() {
    let bridge = common::ref_bridge();
    let err = descriptor("Scale", vec![ElementType::F32], vec![ElementType::F32])
        .create_kernel(&bridge, &Attributes::new())
        .unwrap_err();
    assert!(err.to_string().ends_with("Scale requires attribute 'factor'"));
}

#[test]
fn unknown_compute_name() {
    let bridge = common::ref_bridge();
    let kernel = descriptor("Identity", vec![], vec![])
        .with_compute("forward")
        .create_kernel(&bridge, &Attributes::new())
        .unwrap();
    assert_eq!(kernel.compute_name(), "forward");

    let mut ctx = OpContext::new(Vec::new(), 0);
    let err = kernel.compute(&mut ctx).unwrap_err();
    assert_eq!(
        err.to_string(),
        "foreign compute 'forward' failed: extop.builtin.Identity has no method 'forward'"
    );
}

#[test]
fn declared_type_mismatch_never_reaches_foreign() {
    let bridge = common::ref_bridge();
    let kernel = descriptor("Doubler", vec![ElementType::F64], vec![ElementType::F64])
        .create_kernel(&bridge, &Attributes::new())
        .unwrap();

    let mut ctx = OpContext::new(vec![Tensor::from_slice(&[1.0f32], vec![1]).into()], 1);
    let err = kernel.compute(&mut ctx).unwrap_err();
    assert!(matches!(err, ExtopError::TypeMismatch { index: 0, .. }));
    assert_eq!(ctx.allocated_outputs(), 0);
}

#[test]
fn string_outputs_are_unsupported() {
    let bridge = common::ref_bridge();
    let kernel = descriptor("Identity", vec![ElementType::I32], vec![ElementType::String])
        .create_kernel(&bridge, &Attributes::new())
        .unwrap();
    let mut ctx = OpContext::new(vec![Tensor::from_slice(&[1i32], vec![1]).into()], 1);
    let err = kernel.compute(&mut ctx).unwrap_err();
    assert!(matches!(err, ExtopError::Unsupported(_)), "{err:?}");
    assert_eq!(ctx.allocated_outputs(), 0);
}

// ═══════════════════════════════════════════════════════════════════════
// Strings and logging
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn logging_class_forwards_lines() {
    let bridge = common::ref_bridge();
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = lines.clone();
    let kernel = descriptor(
        "Logging",
        vec![ElementType::String, ElementType::I64],
        vec![],
    )
    .with_logger(move |msg| sink.lock().unwrap().push(msg.to_string()))
    .create_kernel(&bridge, &Attributes::new())
    .unwrap();

    let mut ctx = OpContext::new(
        vec![
            Tensor::from_strings(&["alpha", "beta"], vec![2]).unwrap().into(),
            Tensor::from_slice(&[1i64, 2, 3], vec![3]).into(),
        ],
        0,
    );
    kernel.compute(&mut ctx).unwrap();

    let lines = lines.lock().unwrap();
    assert_eq!(
        *lines,
        vec![
            "input 0: strings [\"alpha\", \"beta\"]".to_string(),
            "input 1: type 9 shape [3] (24 bytes)".to_string(),
        ]
    );
}

// ═══════════════════════════════════════════════════════════════════════
// Lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn released_kernel_refuses_compute() {
    let bridge = common::ref_bridge();
    let mut kernel = descriptor("Identity", vec![], vec![])
        .create_kernel(&bridge, &Attributes::new())
        .unwrap();
    assert!(kernel.is_live());
    assert!(kernel.instance_id().is_some());

    kernel.release();
    assert!(!kernel.is_live());
    kernel.release();

    let mut ctx = OpContext::new(Vec::new(), 0);
    assert!(matches!(
        kernel.compute(&mut ctx).unwrap_err(),
        ExtopError::Released
    ));
}

#[test]
fn distinct_nodes_get_distinct_instances() {
    let bridge = common::ref_bridge();
    let desc = descriptor("Doubler", vec![ElementType::F32], vec![ElementType::F32]);
    let a = desc.create_kernel(&bridge, &Attributes::new()).unwrap();
    let b = desc.create_kernel(&bridge, &Attributes::new()).unwrap();
    assert_ne!(a.instance_id(), b.instance_id());
    assert!(extop_ref::live_instances() >= 2);
    assert!(extop_ref::initialize_calls() >= 1);
}

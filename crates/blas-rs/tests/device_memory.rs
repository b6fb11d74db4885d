use std::sync::Arc;

use blas_rs::kernel::PortableKernels;
use blas_rs::{
    api, DataType, Device, GemmStridedBatchedEx, Handle, MatrixArg, Operation, PointerLocation,
    PointerMode, ResultArg, Scalar, ScalarArg, Status,
};

fn handle_on(device: Device) -> Handle {
    let _ = env_logger::builder().is_test(true).try_init();
    Handle::with_kernels(device, Arc::new(PortableKernels::new())).expect("failed to create handle")
}

/// 2x2x2 single precision request over packed operands, each in its own 16-byte allocation.
fn small_sgemm(device: &Device) -> GemmStridedBatchedEx {
    let matrix = || {
        let buffer = device.upload(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        MatrixArg::new(buffer.ptr(), DataType::F32, 2, 4)
    };
    GemmStridedBatchedEx {
        trans_a: Operation::NoTranspose,
        trans_b: Operation::NoTranspose,
        m: 2,
        n: 2,
        k: 2,
        alpha: ScalarArg::Host(Scalar::F32(1.0)),
        a: matrix(),
        b: matrix(),
        beta: ScalarArg::Host(Scalar::F32(1.0)),
        c: matrix(),
        d: matrix(),
        batch_count: 1,
        compute_type: DataType::F32,
    }
}

#[test]
fn allocation_beyond_capacity_is_memory_error() {
    let device = Device::new(1024);
    let _held = device.alloc(1000).unwrap();
    let err = device.alloc(100).unwrap_err();
    assert_eq!(err.status(), Status::MemoryError);
}

#[test]
fn exhausted_scratch_is_memory_error_and_nothing_runs() {
    // Exactly room for the four operands, none for staging them.
    let device = Device::new(64);
    let handle = handle_on(device.clone());
    let args = small_sgemm(&device);
    assert_eq!(device.used_bytes(), 64);

    assert_eq!(
        api::gemm_strided_batched_ex(Some(&handle), &args),
        Status::MemoryError
    );
    handle.synchronize().unwrap();
    let d = args.d.ptr.buffer().unwrap().download::<f32>();
    assert_eq!(d, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn scratch_is_returned_once_the_work_has_run() {
    let device = Device::new(4096);
    let handle = handle_on(device.clone());
    let args = small_sgemm(&device);
    let resident = device.used_bytes();

    assert_eq!(
        api::gemm_strided_batched_ex(Some(&handle), &args),
        Status::Success
    );
    handle.synchronize().unwrap();
    assert_eq!(device.used_bytes(), resident);
    // [[1, 3], [2, 4]]^2 + c
    let d = args.d.ptr.buffer().unwrap().download::<f32>();
    assert_eq!(d, vec![8.0, 12.0, 18.0, 26.0]);
}

#[test]
fn pointer_location_reports_device_memory_only() {
    let device = Device::new(1 << 20);
    let buffer = device.alloc(256).unwrap();
    let inside = buffer.ptr().add::<f32>(10);
    assert_eq!(
        device.pointer_location(inside.address()),
        PointerLocation::Device
    );

    let host = vec![0.0f32; 4];
    assert_eq!(
        device.pointer_location(host.as_ptr() as u64),
        PointerLocation::Unknown
    );

    let other = Device::new(1 << 20);
    assert_eq!(
        other.pointer_location(inside.address()),
        PointerLocation::Unknown
    );
}

#[test]
fn asum_checks_the_strided_span() {
    let device = Device::new(1 << 20);
    let handle = handle_on(device.clone());
    let x = device.upload(&[1.0f32, -2.0, 3.0, -4.0]).unwrap();
    let mut sum = Scalar::F32(0.0);

    let status = api::asum(
        Some(&handle),
        DataType::F32,
        3,
        &x.ptr(),
        2,
        ResultArg::Host(&mut sum),
    );
    assert_eq!(status, Status::InvalidSize, "third element lies past the end");

    let status = api::asum(
        Some(&handle),
        DataType::F32,
        2,
        &x.ptr(),
        2,
        ResultArg::Host(&mut sum),
    );
    assert_eq!(status, Status::Success);
    assert_eq!(sum, Scalar::F32(4.0));
}

#[test]
fn asum_span_overflow_is_invalid_size() {
    let device = Device::new(1 << 20);
    let handle = handle_on(device.clone());
    let x = device.upload(&[1.0f32, -2.0, 3.0, -4.0]).unwrap();
    let mut sum = Scalar::F32(-1.0);

    for (n, incx) in [(4, i64::MAX), (i64::MAX, 2)] {
        let status = api::asum(
            Some(&handle),
            DataType::F32,
            n,
            &x.ptr(),
            incx,
            ResultArg::Host(&mut sum),
        );
        assert_eq!(status, Status::InvalidSize, "n={n} incx={incx}");
    }
    assert_eq!(sum, Scalar::F32(-1.0));
    assert!(handle.synchronize().is_ok());
}

#[test]
fn asum_rejects_mismatched_results_and_types() {
    let device = Device::new(1 << 20);
    let mut handle = handle_on(device.clone());
    let x = device.upload(&[1.0f64, 2.0]).unwrap();
    let out = device.alloc(8).unwrap();
    let mut sum = Scalar::F64(0.0);

    let status = api::asum(
        Some(&handle),
        DataType::F64,
        2,
        &x.ptr(),
        1,
        ResultArg::Device(out.ptr()),
    );
    assert_eq!(status, Status::InvalidPointer, "device result in host mode");

    let status = api::asum(
        Some(&handle),
        DataType::F16,
        2,
        &x.ptr(),
        1,
        ResultArg::Host(&mut sum),
    );
    assert_eq!(status, Status::InvalidValue);

    handle.set_pointer_mode(PointerMode::Device);
    let status = api::asum(
        Some(&handle),
        DataType::F64,
        2,
        &x.ptr(),
        1,
        ResultArg::Host(&mut sum),
    );
    assert_eq!(status, Status::InvalidPointer, "host result in device mode");
}

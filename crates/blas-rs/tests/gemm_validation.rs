use std::sync::Arc;

use blas_rs::kernel::PortableKernels;
use blas_rs::{
    api, DataType, Device, DevicePtr, GemmStridedBatchedEx, Handle, MatrixArg, Operation,
    PointerMode, Scalar, ScalarArg, Status, ValidationMode,
};
use proptest::prelude::*;

fn test_handle() -> Handle {
    let _ = env_logger::builder().is_test(true).try_init();
    Handle::with_kernels(Device::new(16 << 20), Arc::new(PortableKernels::new()))
        .expect("failed to create handle")
}

fn packed(device: &Device, rows: i64, cols: i64, batch_count: i64) -> MatrixArg {
    let ld = rows.max(1);
    let stride = ld * cols.max(1);
    let elements = (stride * batch_count.max(1)) as usize;
    let buffer = device.alloc(elements * 4).expect("failed to allocate operand");
    MatrixArg::new(buffer.ptr(), DataType::F32, ld, stride)
}

/// A well-formed single precision request over freshly allocated, packed operands.
fn sgemm_args(handle: &Handle, m: i64, n: i64, k: i64, batch_count: i64) -> GemmStridedBatchedEx {
    let device = handle.device();
    GemmStridedBatchedEx {
        trans_a: Operation::NoTranspose,
        trans_b: Operation::NoTranspose,
        m,
        n,
        k,
        alpha: ScalarArg::Host(Scalar::F32(1.0)),
        a: packed(device, m, k, batch_count),
        b: packed(device, k, n, batch_count),
        beta: ScalarArg::Host(Scalar::F32(1.0)),
        c: packed(device, m, n, batch_count),
        d: packed(device, m, n, batch_count),
        batch_count,
        compute_type: DataType::F32,
    }
}

fn status(handle: &Handle, args: &GemmStridedBatchedEx) -> Status {
    api::gemm_strided_batched_ex(Some(handle), args)
}

#[test]
fn negative_batch_count_is_invalid_size() {
    let handle = test_handle();
    let args = sgemm_args(&handle, 8, 9, 10, -1);
    assert_eq!((args.a.ld, args.b.ld, args.c.ld, args.d.ld), (8, 10, 8, 8));
    assert_eq!(status(&handle, &args), Status::InvalidSize);
}

#[test]
fn well_formed_request_succeeds() {
    let handle = test_handle();
    let args = sgemm_args(&handle, 8, 9, 10, 3);
    assert_eq!(status(&handle, &args), Status::Success);
    handle.synchronize().unwrap();
}

#[test]
fn absent_handle_is_reported_before_arguments() {
    let handle = test_handle();
    let args = sgemm_args(&handle, -1, 9, 10, -1);
    assert_eq!(
        api::gemm_strided_batched_ex(None, &args),
        Status::InvalidHandle
    );
}

#[test]
fn size_checks_precede_pointer_checks() {
    let handle = test_handle();
    let mut args = sgemm_args(&handle, 4, 4, 4, 1);
    args.m = -1;
    args.alpha = ScalarArg::Null;
    args.a.ptr = DevicePtr::null();
    args.d.ptr = DevicePtr::null();
    assert_eq!(status(&handle, &args), Status::InvalidSize);
}

#[test]
fn leading_dimensions_cover_stored_rows() {
    let handle = test_handle();
    let base = sgemm_args(&handle, 8, 9, 10, 1);

    let mut args = base.clone();
    args.a.ld = 7;
    assert_eq!(status(&handle, &args), Status::InvalidSize, "lda < m");

    // Transposed A stores k rows.
    let mut args = base.clone();
    args.trans_a = Operation::Transpose;
    args.a.ld = 9;
    assert_eq!(status(&handle, &args), Status::InvalidSize, "lda < k");

    let mut args = base.clone();
    args.b.ld = 9;
    assert_eq!(status(&handle, &args), Status::InvalidSize, "ldb < k");

    let mut args = base.clone();
    args.trans_b = Operation::ConjugateTranspose;
    args.b.ld = 8;
    assert_eq!(status(&handle, &args), Status::InvalidSize, "ldb < n");

    let mut args = base.clone();
    args.c.ld = 7;
    assert_eq!(status(&handle, &args), Status::InvalidSize, "ldc < m");

    let mut args = base;
    args.d.ld = 7;
    assert_eq!(status(&handle, &args), Status::InvalidSize, "ldd < m");
}

#[test]
fn unsupported_type_tuples_are_invalid_value() {
    let handle = test_handle();
    let base = sgemm_args(&handle, 2, 2, 2, 1);
    let tuples = [
        // (a, b, c/d, compute)
        (DataType::F32, DataType::F16, DataType::F32, DataType::F32),
        (DataType::F16, DataType::F16, DataType::F16, DataType::F64),
        (DataType::F32, DataType::F32, DataType::F32, DataType::F64),
        (DataType::F64, DataType::F64, DataType::F64, DataType::F32),
        (DataType::Bf16, DataType::Bf16, DataType::Bf16, DataType::F32),
        (DataType::I8, DataType::I8, DataType::I32, DataType::I32),
        (DataType::Cf32, DataType::Cf32, DataType::Cf32, DataType::Cf32),
        (DataType::F16, DataType::F16, DataType::F32, DataType::F32),
    ];
    for (a, b, cd, compute) in tuples {
        let mut args = base.clone();
        args.a.dtype = a;
        args.b.dtype = b;
        args.c.dtype = cd;
        args.d.dtype = cd;
        args.compute_type = compute;
        assert_eq!(
            status(&handle, &args),
            Status::InvalidValue,
            "{a}/{b}/{cd} with {compute}"
        );
    }
}

#[test]
fn empty_problems_return_before_pointers_and_types() {
    let handle = test_handle();
    for (m, n, batch_count) in [(0, 4, 2), (4, 0, 2), (4, 4, 0)] {
        let mut args = sgemm_args(&handle, m, n, 4, batch_count);
        args.alpha = ScalarArg::Null;
        args.beta = ScalarArg::Null;
        args.a.ptr = DevicePtr::null();
        args.b.ptr = DevicePtr::null();
        args.c.ptr = DevicePtr::null();
        args.d.ptr = DevicePtr::null();
        args.compute_type = DataType::Cf64;
        assert_eq!(
            status(&handle, &args),
            Status::Success,
            "m={m} n={n} batch_count={batch_count}"
        );
    }
}

#[test]
fn dereferenced_null_pointers_are_invalid_pointer() {
    let handle = test_handle();
    let base = sgemm_args(&handle, 3, 3, 3, 2);

    let mut args = base.clone();
    args.d.ptr = DevicePtr::null();
    assert_eq!(status(&handle, &args), Status::InvalidPointer, "d");

    let mut args = base.clone();
    args.a.ptr = DevicePtr::null();
    assert_eq!(status(&handle, &args), Status::InvalidPointer, "a");

    let mut args = base.clone();
    args.b.ptr = DevicePtr::null();
    assert_eq!(status(&handle, &args), Status::InvalidPointer, "b");

    let mut args = base.clone();
    args.c.ptr = DevicePtr::null();
    assert_eq!(status(&handle, &args), Status::InvalidPointer, "c with beta=1");

    let mut args = base.clone();
    args.alpha = ScalarArg::Null;
    assert_eq!(status(&handle, &args), Status::InvalidPointer, "alpha");

    let mut args = base;
    args.beta = ScalarArg::Device(DevicePtr::null());
    assert_eq!(status(&handle, &args), Status::InvalidPointer, "beta");
}

#[test]
fn unread_operands_may_be_null() {
    let handle = test_handle();

    let mut args = sgemm_args(&handle, 3, 3, 3, 2);
    args.alpha = ScalarArg::Host(Scalar::F32(0.0));
    args.a.ptr = DevicePtr::null();
    args.b.ptr = DevicePtr::null();
    assert_eq!(status(&handle, &args), Status::Success, "alpha=0");

    let mut args = sgemm_args(&handle, 3, 3, 0, 2);
    args.a.ptr = DevicePtr::null();
    args.b.ptr = DevicePtr::null();
    assert_eq!(status(&handle, &args), Status::Success, "k=0");

    let mut args = sgemm_args(&handle, 3, 3, 3, 2);
    args.beta = ScalarArg::Host(Scalar::F32(0.0));
    args.c.ptr = DevicePtr::null();
    assert_eq!(status(&handle, &args), Status::Success, "beta=0");
    handle.synchronize().unwrap();
}

#[test]
fn scalar_location_must_match_pointer_mode() {
    let mut handle = test_handle();
    let args = sgemm_args(&handle, 2, 2, 2, 1);
    handle.set_pointer_mode(PointerMode::Device);
    assert_eq!(status(&handle, &args), Status::InvalidPointer);

    let one = handle.device().upload(&[1.0f32]).unwrap();
    let mut args = args;
    args.alpha = ScalarArg::Device(one.ptr());
    args.beta = ScalarArg::Device(one.ptr());
    assert_eq!(status(&handle, &args), Status::Success);

    handle.set_pointer_mode(PointerMode::Host);
    assert_eq!(status(&handle, &args), Status::InvalidPointer);
    handle.synchronize().unwrap();
}

#[test]
fn extents_outside_allocations_are_invalid_size() {
    let handle = test_handle();
    let base = sgemm_args(&handle, 4, 4, 4, 3);
    let before = base.d.ptr.buffer().unwrap().download::<f32>();

    let mut args = base.clone();
    args.d.stride += 1;
    assert_eq!(status(&handle, &args), Status::InvalidSize, "d stride");

    let mut args = base.clone();
    args.a.ptr = args.a.ptr.add::<f32>(1);
    assert_eq!(status(&handle, &args), Status::InvalidSize, "a offset");

    let mut args = base.clone();
    args.b.ld = 5;
    assert_eq!(status(&handle, &args), Status::InvalidSize, "b ld");

    let mut args = base.clone();
    args.c.ptr = args.c.ptr.add::<f32>(-1);
    assert_eq!(status(&handle, &args), Status::InvalidSize, "c before allocation");

    handle.synchronize().unwrap();
    let after = base.d.ptr.buffer().unwrap().download::<f32>();
    assert_eq!(before, after, "rejected requests must not enqueue work");
}

#[test]
fn unaddressable_leading_dimensions_are_invalid_size() {
    let handle = test_handle();
    let base = sgemm_args(&handle, 1, 1, 5, 1);
    let before = base.d.ptr.buffer().unwrap().download::<f32>();

    let mut args = base.clone();
    args.a.ld = 1 << 62;
    assert_eq!(status(&handle, &args), Status::InvalidSize, "lda");

    let mut args = base.clone();
    args.trans_b = Operation::Transpose;
    args.b.ld = i64::MAX;
    assert_eq!(status(&handle, &args), Status::InvalidSize, "ldb");

    let mut args = sgemm_args(&handle, 1, 5, 1, 1);
    args.d.ld = 1 << 62;
    assert_eq!(status(&handle, &args), Status::InvalidSize, "ldd");

    assert!(handle.synchronize().is_ok(), "nothing was enqueued");
    let after = base.d.ptr.buffer().unwrap().download::<f32>();
    assert_eq!(before, after);
}

#[test]
fn device_scalar_outside_allocation_is_invalid_size() {
    let mut handle = test_handle();
    handle.set_pointer_mode(PointerMode::Device);
    let scalars = handle.device().upload(&[1.0f32]).unwrap();
    let mut args = sgemm_args(&handle, 2, 2, 2, 1);
    args.alpha = ScalarArg::Device(scalars.ptr());
    args.beta = ScalarArg::Device(scalars.ptr().add::<f32>(1));
    assert_eq!(status(&handle, &args), Status::InvalidSize);
}

#[test]
fn negative_strides_walk_backwards_through_memory() {
    let handle = test_handle();
    let device = handle.device();
    let a = device.upload(&[2.0f32, 3.0]).unwrap();
    let b = device.upload(&[5.0f32, 7.0]).unwrap();
    let d = device.alloc(8).unwrap();
    let mut args = GemmStridedBatchedEx {
        trans_a: Operation::NoTranspose,
        trans_b: Operation::NoTranspose,
        m: 1,
        n: 1,
        k: 1,
        alpha: ScalarArg::Host(Scalar::F32(1.0)),
        a: MatrixArg::new(a.ptr().add::<f32>(1), DataType::F32, 1, -1),
        b: MatrixArg::new(b.ptr(), DataType::F32, 1, 1),
        beta: ScalarArg::Host(Scalar::F32(0.0)),
        c: MatrixArg::new(DevicePtr::null(), DataType::F32, 1, 1),
        d: MatrixArg::new(d.ptr(), DataType::F32, 1, 1),
        batch_count: 2,
        compute_type: DataType::F32,
    };
    assert_eq!(status(&handle, &args), Status::Success);
    handle.synchronize().unwrap();
    assert_eq!(d.download::<f32>(), vec![15.0, 14.0]);

    args.a.ptr = a.ptr();
    assert_eq!(status(&handle, &args), Status::InvalidSize);
}

#[test]
fn strict_mode_rejects_zero_stride_outputs() {
    let mut handle = test_handle();
    let mut shared_d = sgemm_args(&handle, 3, 3, 3, 2);
    shared_d.d.stride = 0;
    assert_eq!(status(&handle, &shared_d), Status::Success, "permissive");

    handle.set_validation_mode(ValidationMode::Strict);
    assert_eq!(status(&handle, &shared_d), Status::InvalidSize, "strict d");

    let mut single = shared_d.clone();
    single.batch_count = 1;
    assert_eq!(status(&handle, &single), Status::Success, "one element");

    let mut aliased = sgemm_args(&handle, 3, 3, 3, 2);
    aliased.c = aliased.d.clone();
    aliased.c.stride = 0;
    assert_eq!(status(&handle, &aliased), Status::InvalidSize, "strict c == d");

    let mut broadcast_c = sgemm_args(&handle, 3, 3, 3, 2);
    broadcast_c.c.stride = 0;
    assert_eq!(status(&handle, &broadcast_c), Status::Success, "broadcast c");
    handle.synchronize().unwrap();
}

/// Status the size checks alone predict for operands that are otherwise valid.
fn expected_size_status(
    (trans_a, trans_b): (Operation, Operation),
    (m, n, k): (i64, i64, i64),
    (lda, ldb, ldc, ldd): (i64, i64, i64, i64),
    batch_count: i64,
) -> Status {
    let a_rows = if trans_a.is_transposed() { k } else { m };
    let b_rows = if trans_b.is_transposed() { n } else { k };
    let invalid = m < 0
        || n < 0
        || k < 0
        || lda < a_rows
        || ldb < b_rows
        || ldc < m
        || ldd < m
        || batch_count < 0;
    if invalid {
        Status::InvalidSize
    } else {
        Status::Success
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn size_validation_matches_model(
        transposed_a in any::<bool>(),
        transposed_b in any::<bool>(),
        m in -2i64..6,
        n in -2i64..6,
        k in -2i64..6,
        lda in -1i64..9,
        ldb in -1i64..9,
        ldc in -1i64..9,
        ldd in -1i64..9,
        batch_count in -2i64..4,
    ) {
        let handle = test_handle();
        let op = |transposed| if transposed { Operation::Transpose } else { Operation::NoTranspose };
        let (trans_a, trans_b) = (op(transposed_a), op(transposed_b));
        // Every operand shares one generous buffer and stride 0, so only sizes can fail.
        let buffer = handle.device().alloc(64 * 4).unwrap();
        let matrix = |ld| MatrixArg::new(buffer.ptr(), DataType::F32, ld, 0);
        let args = GemmStridedBatchedEx {
            trans_a,
            trans_b,
            m,
            n,
            k,
            alpha: ScalarArg::Host(Scalar::F32(1.0)),
            a: matrix(lda),
            b: matrix(ldb),
            beta: ScalarArg::Host(Scalar::F32(1.0)),
            c: matrix(ldc),
            d: matrix(ldd),
            batch_count,
            compute_type: DataType::F32,
        };
        let expected = expected_size_status(
            (trans_a, trans_b),
            (m, n, k),
            (lda, ldb, ldc, ldd),
            batch_count,
        );
        prop_assert_eq!(status(&handle, &args), expected);
        prop_assert!(handle.synchronize().is_ok());
    }
}

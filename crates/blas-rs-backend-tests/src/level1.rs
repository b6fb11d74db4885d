use std::sync::Arc;

use blas_rs::kernel::BlasKernels;
use blas_rs::{api, DataType, PointerMode, ResultArg, Scalar, Status};
use blas_rs_backend_ref_cpu::reference;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::harness::test_handle;

fn strided_values(len: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| f64::from(rng.gen_range(-50i32..=50)) / 4.0).collect()
}

pub fn asum_host_result_matches_reference(kernels: Arc<dyn BlasKernels>) {
    let handle = test_handle(kernels, PointerMode::Host);
    let (n, incx) = (17usize, 3usize);
    let values = strided_values((n - 1) * incx + 1, 11);
    let want = reference::asum(n, &values, incx);

    let x64 = handle.device().upload(&values).unwrap();
    let mut result = Scalar::F64(-1.0);
    let status = api::asum(
        Some(&handle),
        DataType::F64,
        n as i64,
        &x64.ptr(),
        incx as i64,
        ResultArg::Host(&mut result),
    );
    assert_eq!(status, Status::Success);
    assert_eq!(result, Scalar::F64(want));

    let narrow: Vec<f32> = values.iter().map(|v| *v as f32).collect();
    let x32 = handle.device().upload(&narrow).unwrap();
    let status = api::asum(
        Some(&handle),
        DataType::F32,
        n as i64,
        &x32.ptr(),
        incx as i64,
        ResultArg::Host(&mut result),
    );
    assert_eq!(status, Status::Success);
    assert_eq!(result, Scalar::F32(want as f32));
}

pub fn asum_device_result_lands_after_synchronize(kernels: Arc<dyn BlasKernels>) {
    let handle = test_handle(kernels, PointerMode::Device);
    let values = strided_values(40, 12);
    let want = reference::asum(20, &values, 2);
    let x = handle.device().upload(&values).unwrap();
    let out = handle.device().upload(&[f64::NAN]).unwrap();
    let status = api::asum(
        Some(&handle),
        DataType::F64,
        20,
        &x.ptr(),
        2,
        ResultArg::Device(out.ptr()),
    );
    assert_eq!(status, Status::Success);
    handle.synchronize().unwrap();
    assert_eq!(out.download::<f64>(), vec![want]);
}

/// Non-positive lengths and increments sum to zero without touching x.
pub fn asum_degenerate_arguments_yield_zero(kernels: Arc<dyn BlasKernels>) {
    let handle = test_handle(kernels, PointerMode::Host);
    let x = handle.device().upload(&[1.0f32]).unwrap();
    for (n, incx) in [(0, 1), (-3, 1), (4, 0), (4, -1)] {
        let mut result = Scalar::F32(7.0);
        let status = api::asum(
            Some(&handle),
            DataType::F32,
            n,
            &x.ptr(),
            incx,
            ResultArg::Host(&mut result),
        );
        assert_eq!(status, Status::Success, "n={n} incx={incx}");
        assert_eq!(result, Scalar::F32(0.0), "n={n} incx={incx}");
    }
}

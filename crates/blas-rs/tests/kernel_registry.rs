use blas_rs::kernel::registry::{create_kernels, has_kernels, list_kernels, resolve_kernels};
use blas_rs::kernel::{BlasKernels, PortableKernels};

#[test]
fn kernel_registry_lookup_and_fallback() {
    blas_rs_backend_ref_cpu::register_reference_kernels();

    let names = list_kernels();
    assert!(names.windows(2).all(|pair| pair[0] <= pair[1]), "{names:?}");

    // The portable set needs no registration.
    assert!(has_kernels(PortableKernels::NAME));
    assert!(has_kernels("reference"));

    // Registered under "cpu" for convenience; reports its own name.
    let cpu = create_kernels("cpu").expect("cpu kernels not registered");
    assert_eq!(cpu.name(), "reference");

    assert!(!has_kernels("nonexistent"));
    assert!(create_kernels("nonexistent").is_none());
    assert_eq!(resolve_kernels("nonexistent").name(), PortableKernels::NAME);
}

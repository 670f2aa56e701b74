//! Backend parity tests for RnntLossOps.

use super::helpers::*;
use numr::dtype::DType;
use numr::runtime::cpu::CpuRuntime;
use numr::tensor::Tensor;
use rnntr::rnnt::{ExecTarget, Precision, RnntLossOps, RnntOptions, workspace_size};

const B: usize = 3;
const T: usize = 6;
const U: usize = 4;
const V: usize = 9;

// element 2 has a label outside the vocabulary and is rejected
const LABELS: [i32; B * (U - 1)] = [1, 5, 8, 2, 2, 0, 3, 12, 4];
const INPUT_LENGTHS: [i32; B] = [6, 4, 5];
const LABEL_LENGTHS: [i32; B] = [3, 2, 3];

fn cpu_loss_f32(acts: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let (client, device) = setup_cpu();
    let acts = Tensor::<CpuRuntime>::from_slice(acts, &[B, T, U, V], &device);
    let labels = Tensor::<CpuRuntime>::from_slice(&LABELS, &[B, U - 1], &device);
    let ilen = Tensor::<CpuRuntime>::from_slice(&INPUT_LENGTHS, &[B], &device);
    let llen = Tensor::<CpuRuntime>::from_slice(&LABEL_LENGTHS, &[B], &device);
    let n = workspace_size(T, U, B, Precision::Single, ExecTarget::Cpu).unwrap();
    let ws = Tensor::<CpuRuntime>::zeros(&[n], DType::U8, &device);
    let out = client
        .rnnt_loss(&acts, &labels, &ilen, &llen, &ws, &RnntOptions::new(T, U), true)
        .unwrap();
    (out.costs.to_vec::<f32>(), out.grads.unwrap().to_vec::<f32>())
}

fn cpu_loss_f64(acts: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let (client, device) = setup_cpu();
    let acts = Tensor::<CpuRuntime>::from_slice(acts, &[B, T, U, V], &device);
    let labels = Tensor::<CpuRuntime>::from_slice(&LABELS, &[B, U - 1], &device);
    let ilen = Tensor::<CpuRuntime>::from_slice(&INPUT_LENGTHS, &[B], &device);
    let llen = Tensor::<CpuRuntime>::from_slice(&LABEL_LENGTHS, &[B], &device);
    let n = workspace_size(T, U, B, Precision::Double, ExecTarget::Cpu).unwrap();
    let ws = Tensor::<CpuRuntime>::zeros(&[n], DType::U8, &device);
    let out = client
        .rnnt_loss(&acts, &labels, &ilen, &llen, &ws, &RnntOptions::new(T, U), true)
        .unwrap();
    (out.costs.to_vec::<f64>(), out.grads.unwrap().to_vec::<f64>())
}

#[test]
fn test_rnnt_loss_parity_f32() {
    let acts = det_logits(B * T * U * V, 0.13);
    let (cpu_costs, cpu_grads) = cpu_loss_f32(&acts);
    assert_eq!(cpu_costs[2], f32::INFINITY);

    // f32 and f64 host runs agree to single precision
    let acts64: Vec<f64> = acts.iter().map(|&x| x as f64).collect();
    let (costs64, grads64) = cpu_loss_f64(&acts64);
    let costs64: Vec<f32> = costs64.iter().map(|&c| c as f32).collect();
    let grads64: Vec<f32> = grads64.iter().map(|&g| g as f32).collect();
    assert_parity_f32_tol(&cpu_costs, &costs64, "rnnt costs f32 vs f64", 1e-5, 1e-4);
    assert_parity_f32_tol(&cpu_grads, &grads64, "rnnt grads f32 vs f64", 1e-4, 1e-5);

    #[cfg(feature = "cuda")]
    with_cuda_backend(|cuda_client, cuda_device| {
        use numr::runtime::cuda::CudaRuntime;

        let acts_c = Tensor::<CudaRuntime>::from_slice(&acts, &[B, T, U, V], &cuda_device);
        let labels_c = Tensor::<CudaRuntime>::from_slice(&LABELS, &[B, U - 1], &cuda_device);
        let ilen_c = Tensor::<CudaRuntime>::from_slice(&INPUT_LENGTHS, &[B], &cuda_device);
        let llen_c = Tensor::<CudaRuntime>::from_slice(&LABEL_LENGTHS, &[B], &cuda_device);
        let n = workspace_size(T, U, B, Precision::Single, ExecTarget::Gpu).unwrap();
        let ws_c = Tensor::<CudaRuntime>::zeros(&[n], DType::U8, &cuda_device);
        let opts = RnntOptions::new(T, U).with_target(ExecTarget::Gpu);

        let out = cuda_client
            .rnnt_loss(&acts_c, &labels_c, &ilen_c, &llen_c, &ws_c, &opts, true)
            .unwrap();
        assert_parity_f32_tol(
            &out.costs.to_vec::<f32>(),
            &cpu_costs,
            "rnnt costs CUDA vs CPU",
            1e-5,
            1e-4,
        );
        assert_parity_f32_tol(
            &out.grads.unwrap().to_vec::<f32>(),
            &cpu_grads,
            "rnnt grads CUDA vs CPU",
            1e-4,
            1e-5,
        );
    });
}

#[test]
fn test_rnnt_loss_parity_f64() {
    let acts: Vec<f64> = det_logits(B * T * U * V, 0.29)
        .iter()
        .map(|&x| x as f64)
        .collect();
    let (cpu_costs, cpu_grads) = cpu_loss_f64(&acts);
    assert_eq!(cpu_costs[2], f64::INFINITY);
    assert!(cpu_grads[2 * T * U * V..].iter().all(|&g| g == 0.0));

    #[cfg(feature = "cuda")]
    with_cuda_backend(|cuda_client, cuda_device| {
        use numr::runtime::cuda::CudaRuntime;

        let acts_c = Tensor::<CudaRuntime>::from_slice(&acts, &[B, T, U, V], &cuda_device);
        let labels_c = Tensor::<CudaRuntime>::from_slice(&LABELS, &[B, U - 1], &cuda_device);
        let ilen_c = Tensor::<CudaRuntime>::from_slice(&INPUT_LENGTHS, &[B], &cuda_device);
        let llen_c = Tensor::<CudaRuntime>::from_slice(&LABEL_LENGTHS, &[B], &cuda_device);
        let n = workspace_size(T, U, B, Precision::Double, ExecTarget::Gpu).unwrap();
        let ws_c = Tensor::<CudaRuntime>::zeros(&[n], DType::U8, &cuda_device);
        let opts = RnntOptions::new(T, U).with_target(ExecTarget::Gpu);

        let out = cuda_client
            .rnnt_loss(&acts_c, &labels_c, &ilen_c, &llen_c, &ws_c, &opts, true)
            .unwrap();
        assert_parity_f64_tol(
            &out.costs.to_vec::<f64>(),
            &cpu_costs,
            "rnnt costs f64 CUDA vs CPU",
            1e-10,
            1e-10,
        );
        assert_parity_f64_tol(
            &out.grads.unwrap().to_vec::<f64>(),
            &cpu_grads,
            "rnnt grads f64 CUDA vs CPU",
            1e-9,
            1e-12,
        );
    });
}

/// Checks `logsumexp(alpha + beta)` over each anti-diagonal of every
/// well-formed element against its forward likelihood.
fn assert_lattice_diagonals(alphas: &[f64], betas: &[f64], ll: &[f64], label: &str) {
    for (b, &total_ll) in ll.iter().enumerate() {
        if !total_ll.is_finite() {
            continue;
        }
        let t_len = INPUT_LENGTHS[b] as usize;
        let u_len = LABEL_LENGTHS[b] as usize + 1;
        for d in 0..t_len + u_len - 1 {
            let terms: Vec<f64> = (0..t_len)
                .filter(|&t| d >= t && d - t < u_len)
                .map(|t| {
                    let node = (b * T + t) * U + d - t;
                    alphas[node] + betas[node]
                })
                .collect();
            let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let sum = max + terms.iter().map(|x| (x - max).exp()).sum::<f64>().ln();
            assert!(
                (sum - total_ll).abs() < 1e-9,
                "{label}: element {b} diagonal {d}: {sum} vs {total_ll}"
            );
        }
    }
}

#[test]
fn test_rnnt_lattice_parity() {
    let (client, device) = setup_cpu();
    let data: Vec<f64> = det_logits(B * T * U * V, 0.71)
        .iter()
        .map(|&x| x as f64)
        .collect();
    let acts = Tensor::<CpuRuntime>::from_slice(&data, &[B, T, U, V], &device);
    let labels = Tensor::<CpuRuntime>::from_slice(&LABELS, &[B, U - 1], &device);
    let ilen = Tensor::<CpuRuntime>::from_slice(&INPUT_LENGTHS, &[B], &device);
    let llen = Tensor::<CpuRuntime>::from_slice(&LABEL_LENGTHS, &[B], &device);
    let n = workspace_size(T, U, B, Precision::Double, ExecTarget::Cpu).unwrap();
    let ws = Tensor::<CpuRuntime>::zeros(&[n], DType::U8, &device);
    let lattice = client
        .rnnt_lattice(&acts, &labels, &ilen, &llen, &ws, &RnntOptions::new(T, U))
        .unwrap();

    // forward likelihood equals -cost on every well-formed element
    let ll = lattice.log_likelihood.to_vec::<f64>();
    let neg_costs: Vec<f64> = lattice.costs.to_vec::<f64>().iter().map(|c| -c).collect();
    assert_parity_f64_tol(&ll, &neg_costs, "rnnt forward vs backward", 1e-12, 1e-12);
    let cpu_alphas = lattice.alphas.to_vec::<f64>();
    let cpu_betas = lattice.betas.to_vec::<f64>();
    assert_lattice_diagonals(&cpu_alphas, &cpu_betas, &ll, "cpu");
    assert_eq!(ll[2], f64::NEG_INFINITY);

    // time steps past element 1's input length stay unreachable
    let padding = T * U + INPUT_LENGTHS[1] as usize * U..2 * T * U;
    assert!(cpu_alphas[padding.clone()].iter().all(|a| a.is_infinite()));
    assert!(cpu_betas[padding].iter().all(|b| b.is_infinite()));

    #[cfg(feature = "cuda")]
    with_cuda_backend(|cuda_client, cuda_device| {
        use numr::runtime::cuda::CudaRuntime;

        let acts_c = Tensor::<CudaRuntime>::from_slice(&data, &[B, T, U, V], &cuda_device);
        let labels_c = Tensor::<CudaRuntime>::from_slice(&LABELS, &[B, U - 1], &cuda_device);
        let ilen_c = Tensor::<CudaRuntime>::from_slice(&INPUT_LENGTHS, &[B], &cuda_device);
        let llen_c = Tensor::<CudaRuntime>::from_slice(&LABEL_LENGTHS, &[B], &cuda_device);
        let n = workspace_size(T, U, B, Precision::Double, ExecTarget::Gpu).unwrap();
        let ws_c = Tensor::<CudaRuntime>::zeros(&[n], DType::U8, &cuda_device);
        let opts = RnntOptions::new(T, U).with_target(ExecTarget::Gpu);

        let lat = cuda_client
            .rnnt_lattice(&acts_c, &labels_c, &ilen_c, &llen_c, &ws_c, &opts)
            .unwrap();
        let cuda_alphas = lat.alphas.to_vec::<f64>();
        let cuda_betas = lat.betas.to_vec::<f64>();
        assert_lattice_diagonals(
            &cuda_alphas,
            &cuda_betas,
            &lat.log_likelihood.to_vec::<f64>(),
            "cuda",
        );
        assert_parity_f64_tol(
            &cuda_alphas,
            &cpu_alphas,
            "rnnt alphas CUDA vs CPU",
            1e-10,
            1e-10,
        );
        assert_parity_f64_tol(
            &cuda_betas,
            &cpu_betas,
            "rnnt betas CUDA vs CPU",
            1e-10,
            1e-10,
        );
    });
}

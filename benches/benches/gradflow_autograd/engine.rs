use criterion::{black_box, criterion_group, Criterion};
use gradflow_autograd::Variable;
use gradflow_core::{device::Device, dtype::DType, error::Result};
use gradflow_tensor::Tensor;

const SIZES: [(usize, &str); 3] = [(100, "small"), (5000, "medium"), (10000, "large")];
const DEPTHS: [usize; 3] = [4, 32, 128];

fn leaf(size: usize, device: Device) -> Result<Variable> {
    let data: Vec<f32> = (0..size).map(|i| (i % 10) as f32 / 10.0).collect();
    Ok(Variable::new(
        Tensor::from_flatten_vec_with_spec(data, &[size], device, DType::F32)?,
        true,
    ))
}

// a chain of `depth` scalar multiplications reduced to one element
fn chain(x: &Variable, depth: usize) -> Result<Variable> {
    let mut y = x.clone();
    for _ in 0..depth {
        y = y.mul_scalar(1.01)?;
    }
    y.sum()
}

// every layer reuses the previous one twice
fn fan_in(x: &Variable, depth: usize) -> Result<Variable> {
    let mut y = x.clone();
    for _ in 0..depth {
        y = y.add(&y.mul_scalar(0.5)?)?;
    }
    y.sum()
}

fn bench_graph<F>(criterion: &mut Criterion, group_name: &str, build: F)
where
    F: Fn(&Variable, usize) -> Result<Variable>,
{
    let mut group = criterion.benchmark_group(group_name);
    group.warm_up_time(core::time::Duration::from_millis(500));
    group.measurement_time(core::time::Duration::from_secs(3));
    group.sample_size(50);

    for (size, size_name) in SIZES {
        for depth in DEPTHS {
            group.bench_function(format!("{}/depth{}", size_name, depth), |b| {
                let x = leaf(size, Device::CPU).unwrap();
                b.iter(|| {
                    let y = build(&x, depth).unwrap();
                    y.backward(None, false, false).unwrap();
                    x.zero_grad().unwrap();
                    black_box(&x);
                })
            });
        }
    }

    group.finish();
}

pub fn backward_chain(criterion: &mut Criterion) {
    bench_graph(criterion, "backward/chain", chain);
}

pub fn backward_fan_in(criterion: &mut Criterion) {
    bench_graph(criterion, "backward/fan_in", fan_in);
}

pub fn backward_cross_device(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("backward/cross_device");
    group.warm_up_time(core::time::Duration::from_millis(500));
    group.measurement_time(core::time::Duration::from_secs(3));
    group.sample_size(50);

    for (size, size_name) in SIZES {
        group.bench_function(size_name, |b| {
            let x = leaf(size, Device::Accel(0)).unwrap();
            b.iter(|| {
                let y = x.mul_scalar(2.0).unwrap().to_device(Device::CPU).unwrap().sum().unwrap();
                y.backward(None, false, false).unwrap();
                x.zero_grad().unwrap();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, backward_chain, backward_fan_in, backward_cross_device);

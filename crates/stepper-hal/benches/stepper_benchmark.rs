use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stepper_hal::hw::{DmaCounter, DriverChip, DriverFault, Prescaler, SegmentTimer};
use stepper_hal::{select_prescaler, MotorConfig, MotorMgr};

#[derive(Default)]
struct BenchTimer;
impl SegmentTimer for BenchTimer {
    fn configure(&mut self, _prescaler: Prescaler, _period: u16) {}
    fn rescale_running_count(&mut self, _old: Prescaler, _new: Prescaler) {}
    fn stop(&mut self) {}
}

#[derive(Default)]
struct BenchDma {
    remaining: u16,
}
impl DmaCounter for BenchDma {
    fn reset(&mut self) {
        self.remaining = 0xFFFF;
    }
    fn read(&self) -> u16 {
        self.remaining
    }
}

#[derive(Default)]
struct BenchDriver;
impl DriverChip for BenchDriver {
    fn enable(&mut self) {}
    fn disable(&mut self) {}
    fn set_microsteps(&mut self, _microsteps: u16) {}
    fn set_current(&mut self, _milliamps: u16) {}
    fn poll_fault(&mut self) -> Option<DriverFault> {
        None
    }
}

fn benchmark_prescaler_selection(c: &mut Criterion) {
    c.bench_function("select_prescaler", |b| {
        b.iter(|| select_prescaler(black_box(263_412)))
    });
}

fn benchmark_prep_move(c: &mut Criterion) {
    let mut mgr: MotorMgr<6, BenchTimer, BenchDma, BenchDriver> = MotorMgr::new();
    for motor in 0..6 {
        mgr.install(motor, BenchTimer, BenchDma::default(), BenchDriver, MotorConfig::default()).unwrap();
    }

    c.bench_function("motor_mgr_prep_move", |b| {
        b.iter(|| {
            for motor in 0..6 {
                let _ = mgr.prep_move(black_box(motor), black_box(0.005), black_box(1008));
                mgr.load_move(motor).unwrap();
            }
        })
    });
}

criterion_group!(benches, benchmark_prescaler_selection, benchmark_prep_move);
criterion_main!(benches);

// Benchmark: the four-mode hot loop at typical block sizes

use std::sync::Arc;
use std::sync::atomic::Ordering;

use criterion::{Criterion, criterion_group, criterion_main};

use myradio_mixer::audio::engine::{BusBuffers, MixKernel};
use myradio_mixer::control::state::ControlBlock;
use myradio_mixer::player::create_player;

const SR: u32 = 44100;

fn bench_mode_loops(c: &mut Criterion) {
    let control = Arc::new(ControlBlock::new());
    let (mut left, la) = create_player("leftplayer", SR).unwrap();
    let (mut right, ra) = create_player("rightplayer", SR).unwrap();
    let (mut jingles, ja) = create_player("jinglesplayer", SR).unwrap();
    let (mut interlude, ia) = create_player("interludeplayer", SR).unwrap();
    let mut kernel = MixKernel::new(Arc::clone(&control), la, ra, ja, ia, Vec::new(), SR);

    let block = 512;
    let mut dj_l = vec![0.0f32; block];
    let mut dj_r = vec![0.0f32; block];
    let mut str_l = vec![0.0f32; block];
    let mut str_r = vec![0.0f32; block];
    let mut voip_l = vec![0.0f32; block];
    let mut voip_r = vec![0.0f32; block];
    let mut dsp_l = vec![0.0f32; block];
    let mut dsp_r = vec![0.0f32; block];
    let silence = vec![0.0f32; block];

    let mut run = |kernel: &mut MixKernel| {
        let mut bus = BusBuffers {
            dj_l: &mut dj_l,
            dj_r: &mut dj_r,
            str_l: &mut str_l,
            str_r: &mut str_r,
            voip_out_l: &mut voip_l,
            voip_out_r: &mut voip_r,
            dsp_out_l: &mut dsp_l,
            dsp_out_r: &mut dsp_r,
            voip_in_l: &silence,
            voip_in_r: &silence,
            dsp_in_l: &silence,
            dsp_in_r: &silence,
        };
        kernel.process_block(&mut bus);
    };

    c.bench_function("no_phone_block_512", |b| b.iter(|| run(&mut kernel)));

    control.mixermode.store(1, Ordering::Relaxed);
    c.bench_function("phone_public_block_512", |b| b.iter(|| run(&mut kernel)));

    control.mixermode.store(2, Ordering::Relaxed);
    c.bench_function("phone_private_block_512", |b| b.iter(|| run(&mut kernel)));

    left.shutdown();
    right.shutdown();
    jingles.shutdown();
    interlude.shutdown();
}

criterion_group!(benches, bench_mode_loops);
criterion_main!(benches);

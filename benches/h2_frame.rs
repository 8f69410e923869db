use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rask_gateway::http2::frame::{parse_frame, Flags, FrameHeader, FrameType, FRAME_HEADER_LEN};

fn framed_payload(len: usize) -> Vec<u8> {
    let header = FrameHeader {
        length: len as u32,
        frame_type: FrameType::Data,
        flags: Flags::END_STREAM,
        stream_id: 1,
    };
    let mut wire = [0u8; FRAME_HEADER_LEN];
    header.write_to(&mut wire);
    let mut buf = wire.to_vec();
    buf.extend(std::iter::repeat(0xab).take(len));
    buf
}

fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("h2_frame_parse");
    for len in [0usize, 64, 4096, 16_384] {
        let buf = framed_payload(len);
        group.throughput(Throughput::Bytes(buf.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse", len), &buf, |b, buf| {
            b.iter(|| parse_frame(buf, 16_384).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);

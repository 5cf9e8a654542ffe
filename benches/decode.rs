//! Decode-path benchmarks

use avlgate_core::core::checksum::{crc16_arc, crc16_x25, xor_checksum};
use avlgate_core::core::protocol::{Aquila, Gt06, Protocol, Teltonika};
use avlgate_core::core::{DeviceFamily, FrameReader, ProtocolSession};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use std::io::Cursor;

const TELTONIKA_FRAME: &str = "000000002d0801000001905a2fcb00010f272306209c8f560070010e090040ef0402ef0171610118004001100016e3600001530c";
const GT06_GPS: &str = "7878171218061b0e3514c9026b3f6d0c3d46d550290e00029bdc0d0a";
const AQUILA_LINE: &str = "$$AQTRK,869867038152396,21,22.546123,114.079123,240627145320,1,63,270,9,52,1500000,124,87,1,3;0C:0FA0;0D:3F;05:5A*40\r\n";

fn checksum_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("crc16_arc", |b| {
        b.iter(|| black_box(crc16_arc(black_box(&data))))
    });
    group.bench_function("crc16_x25", |b| {
        b.iter(|| black_box(crc16_x25(black_box(&data))))
    });
    group.bench_function("xor", |b| {
        b.iter(|| black_box(xor_checksum(black_box(&data))))
    });

    group.finish();
}

fn frame_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("frame");

    let teltonika_frame = hex::decode(TELTONIKA_FRAME).unwrap();
    group.throughput(Throughput::Bytes(teltonika_frame.len() as u64));
    group.bench_function("teltonika_codec8", |b| {
        b.to_async(&rt).iter(|| {
            let bytes = teltonika_frame.clone();
            async move {
                let mut reader = FrameReader::new(Cursor::new(bytes));
                let mut session =
                    ProtocolSession::new("356307043721579".into(), DeviceFamily::Teltonika);
                let outcome = Teltonika::new()
                    .read_frame(&mut reader, &mut session)
                    .await
                    .unwrap();
                black_box(outcome)
            }
        })
    });

    let gt06_frame = hex::decode(GT06_GPS).unwrap();
    group.throughput(Throughput::Bytes(gt06_frame.len() as u64));
    group.bench_function("gt06_gps", |b| {
        b.to_async(&rt).iter(|| {
            let bytes = gt06_frame.clone();
            async move {
                let mut reader = FrameReader::new(Cursor::new(bytes));
                let mut session =
                    ProtocolSession::new("123456789012345".into(), DeviceFamily::Gt06);
                let outcome = Gt06::default()
                    .read_frame(&mut reader, &mut session)
                    .await
                    .unwrap();
                black_box(outcome)
            }
        })
    });

    let aquila_line = AQUILA_LINE.as_bytes().to_vec();
    group.throughput(Throughput::Bytes(aquila_line.len() as u64));
    group.bench_function("aquila_line", |b| {
        b.to_async(&rt).iter(|| {
            let bytes = aquila_line.clone();
            async move {
                let mut reader = FrameReader::new(Cursor::new(bytes));
                let mut session =
                    ProtocolSession::new("869867038152396".into(), DeviceFamily::Aquila);
                let outcome = Aquila::new()
                    .read_frame(&mut reader, &mut session)
                    .await
                    .unwrap();
                black_box(outcome)
            }
        })
    });

    group.finish();
}

criterion_group!(benches, checksum_benchmark, frame_benchmark);
criterion_main!(benches);

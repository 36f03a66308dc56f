use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use respprobe::*;

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp");
    group.bench_function("encode_set_1k", |b| {
        let keys: Vec<String> = (0..1000).map(|i| format!("key{}", i)).collect();
        let mut buf = BytesMut::with_capacity(64 * 1024);
        b.iter(|| {
            buf.clear();
            for k in &keys {
                write_command(&[b"SET".as_slice(), k.as_bytes(), b"value".as_slice()], &mut buf);
            }
            black_box(buf.len());
        });
    });
    group.finish();
}

fn bench_reply_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp");
    group.bench_function("parse_replies_1k", |b| {
        let mut buf = BytesMut::new();
        for i in 0..1000 {
            match i % 4 {
                0 => buf.extend_from_slice(&resp_simple("OK")),
                1 => buf.extend_from_slice(&resp_bulk(format!("val{}", i).as_bytes())),
                2 => buf.extend_from_slice(&resp_integer(i)),
                _ => buf.extend_from_slice(&resp_array(vec![resp_bulk(b"a"), resp_null()])),
            }
        }
        b.iter(|| {
            let mut tmp = buf.clone();
            let mut out = Vec::new();
            parse_replies(&mut tmp, &mut out).unwrap();
            black_box(out.len());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_reply_parse);
criterion_main!(benches);

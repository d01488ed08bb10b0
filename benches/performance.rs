use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use portico::core::bufio::Writer;
use portico::core::connection::Conn;
use portico::proto::memcache::binary::{self, Header, Opcode, PONG};
use portico::proto::redis::{self, Resp};
use portico::{MsgBatch, NodeConn, Pinger, Protocol};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;

const PIPE_CAPACITY: usize = 1 << 20;

fn redis_replies(count: usize) -> Vec<u8> {
    let mut w = Writer::new();
    for i in 0..count {
        Resp::BulkString(Some(format!("value-{}", i).into())).encode(&mut w);
    }
    w.buf_mut().to_vec()
}

fn memcache_replies(count: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for _ in 0..count {
        Header {
            magic: binary::MAGIC_RESPONSE,
            opcode: Opcode::Get as u8,
            key_len: 0,
            extras_len: 4,
            data_type: 0,
            vbucket_or_status: 0,
            body_len: 4 + 32,
            opaque: 0,
            cas: 0,
        }
        .write_to(&mut out);
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&[b'v'; 32]);
    }
    out
}

/// Pipelined write/read cycle against an in-memory peer that already holds
/// every reply
async fn batch_cycle(protocol: Protocol, count: usize, replies: &[u8]) {
    let (client, mut server) = tokio::io::duplex(PIPE_CAPACITY);
    server.write_all(replies).await.unwrap();

    let mut conn = NodeConn::new("bench", protocol, Conn::new(client, "duplex", None, None)).unwrap();
    let mut batch = MsgBatch::with_buffer_size(512);
    for i in 0..count {
        let key = format!("key-{}", i);
        match protocol {
            Protocol::Redis => batch.add_request(redis::Request::from_args("GET", &[key.as_str()]).unwrap()),
            Protocol::MemcacheBinary => batch.add_request(binary::Request::get(key.as_bytes())),
        }
    }

    conn.write_batch(&mut batch).await.unwrap();
    conn.read_batch(&mut batch).await.unwrap();
    black_box(batch);
}

/// Batch pipeline benchmarks
fn bench_node_conn(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("node_conn");

    for count in [1usize, 16, 128].iter() {
        let replies = redis_replies(*count);
        group.bench_with_input(BenchmarkId::new("redis_batch", count), count, |b, &count| {
            b.to_async(&rt)
                .iter(|| batch_cycle(Protocol::Redis, count, &replies));
        });

        let replies = memcache_replies(*count);
        group.bench_with_input(BenchmarkId::new("memcache_batch", count), count, |b, &count| {
            b.to_async(&rt)
                .iter(|| batch_cycle(Protocol::MemcacheBinary, count, &replies));
        });
    }

    group.finish();
}

/// Probe round trip benchmark
fn bench_ping(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("memcache_ping", |b| {
        b.to_async(&rt).iter(|| async {
            let (client, mut server) = tokio::io::duplex(256);
            server.write_all(&PONG).await.unwrap();
            let mut pinger = Pinger::for_protocol(
                Conn::new(client, "duplex", None, None),
                Protocol::MemcacheBinary,
            )
            .unwrap();
            pinger.ping().await.unwrap();
            black_box(pinger);
        });
    });
}

criterion_group!(benches, bench_node_conn, bench_ping);
criterion_main!(benches);

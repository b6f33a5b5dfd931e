//! Hot-path encode/decode throughput.

use codec::rdm::login::{LoginRefresh, LoginRequest};
use codec::{EncodeCursor, RawMsg};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use types::UserNameType;

fn bench_login_request_encode(c: &mut Criterion) {
    let mut request = LoginRequest::new();
    request.user_name.set_str("perfuser");
    request.user_name_type = Some(UserNameType::Name);
    request.attrib.application_id.set_str("256");
    request.attrib.position.set_str("10.0.0.4/net");

    let mut buf = Vec::with_capacity(512);
    c.bench_function("login_request_encode", |b| {
        b.iter(|| {
            buf.clear();
            let mut enc = EncodeCursor::new(&mut buf, 512, 14, 1);
            request.encode(&mut enc).unwrap();
            black_box(buf.len());
        })
    });
}

fn bench_login_refresh_round_trip(c: &mut Criterion) {
    let mut refresh = LoginRefresh::new();
    refresh.user_name.set_str("perfuser");
    refresh.solicited = true;
    refresh.attrib.application_id.set_str("256");
    refresh.features.support_post = Some(1);

    let mut buf = Vec::with_capacity(512);
    {
        let mut enc = EncodeCursor::new(&mut buf, 512, 14, 1);
        refresh.encode(&mut enc).unwrap();
    }

    let mut decoded = LoginRefresh::new();
    c.bench_function("login_refresh_decode", |b| {
        b.iter(|| {
            let raw = RawMsg::decode(black_box(&buf)).unwrap();
            decoded.decode(&raw).unwrap();
            black_box(decoded.solicited);
        })
    });
}

criterion_group!(benches, bench_login_request_encode, bench_login_refresh_round_trip);
criterion_main!(benches);

use aesfs_crypto::{derive_key, seal, unwrap, DerivedKey, MasterKey, NameCipher, PBKDF2_ITERATIONS};

fn make_name(len: usize) -> String {
    (0..len)
        .map(|i| (b'a' + ((i.wrapping_mul(7) ^ (i >> 3)) % 26) as u8) as char)
        .collect()
}

#[divan::bench(args = [8, 32, 128, 255])]
fn bench_encode_name(bencher: divan::Bencher, len: usize) {
    let cipher = NameCipher::new(&DerivedKey::from_bytes([0xABu8; 32]));
    let name = make_name(len);
    bencher
        .counter(divan::counter::BytesCount::new(len))
        .bench(|| cipher.encode(divan::black_box(&name)));
}

#[divan::bench(args = [8, 32, 128, 255])]
fn bench_decode_name(bencher: divan::Bencher, len: usize) {
    let cipher = NameCipher::new(&DerivedKey::from_bytes([0xABu8; 32]));
    let encoded = cipher.encode(&make_name(len));
    bencher
        .counter(divan::counter::BytesCount::new(len))
        .bench(|| cipher.decode(divan::black_box(&encoded)).unwrap());
}

#[divan::bench]
fn bench_derive_key() -> DerivedKey {
    derive_key(
        divan::black_box(b"correct horse battery staple"),
        divan::black_box(&[7u8; 16]),
        PBKDF2_ITERATIONS,
    )
    .unwrap()
}

#[divan::bench]
fn bench_unwrap_master_key(bencher: divan::Bencher) {
    let sealed = seal(&MasterKey::from_bytes([1u8; 32]), b"pw").unwrap();
    bencher.bench(|| unwrap(divan::black_box(&sealed), b"pw").unwrap());
}

fn main() {
    divan::main();
}

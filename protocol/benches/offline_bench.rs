// Offline bundle benchmarks.
//
// Covers building and signing a bundle, encoding and decoding it in every
// transport format, and full offline verification.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use custodia_protocol::clock::SystemClock;
use custodia_protocol::config::{BundleConfig, OfflineVerificationConfig};
use custodia_protocol::crypto::{IdentityKeypair, IntegrityCodec};
use custodia_protocol::identity::{
    ClaimValue, CredentialRecord, Did, IdentityRecord, MemoryIdentityStore,
};
use custodia_protocol::offline::{
    decode, encode, sign_challenge, BuildRequest, BundleFormat, OfflinePackageBuilder,
    OfflineVerificationRequest, OfflineVerifier, VerificationMode,
};

const FORMATS: [BundleFormat; 5] = [
    BundleFormat::SelfContained,
    BundleFormat::Compressed,
    BundleFormat::QrCode,
    BundleFormat::Nfc,
    BundleFormat::Printable,
];

struct Setup {
    builder: OfflinePackageBuilder,
    issuer_did: String,
    issuer_key: Vec<u8>,
    holder: IdentityKeypair,
    did: String,
}

fn setup(credentials: usize) -> Setup {
    let store = Arc::new(MemoryIdentityStore::new());
    let holder = IdentityKeypair::from_seed(&[7u8; 32]);
    let did = Did::from_public_key(&holder.public_key()).to_string();
    let now = Utc::now();
    store.upsert_identity(IdentityRecord {
        did: did.clone(),
        identity_hash: "33".repeat(32),
        public_key: holder.public_key().to_hex(),
        controller: "cust1bench".into(),
        verification_level: 4,
        kyc_level: 2,
        created_at: now,
        updated_at: now,
    });
    for i in 0..credentials {
        let mut subject = BTreeMap::new();
        subject.insert("index".to_string(), ClaimValue::Integer(i as i64));
        store.add_credential(
            &did,
            CredentialRecord {
                id: format!("cred-{i}"),
                types: vec!["VerifiableCredential".into(), "KYCCredential".into()],
                issuer: "did:example:registry".into(),
                issuance_date: now - Duration::days(1),
                expiration_date: Some(now + Duration::days(365)),
                subject,
                offline_usable: true,
                priority: (i % 100) as u8,
            },
        );
    }

    let signer = IdentityKeypair::from_seed(&[8u8; 32]);
    let issuer_did = Did::from_public_key(&signer.public_key()).to_string();
    let issuer_key = signer.public_key().as_bytes().to_vec();
    let builder = OfflinePackageBuilder::new(
        store,
        IntegrityCodec::standard(),
        issuer_did.clone(),
        Arc::new(signer),
        Arc::new(SystemClock),
        BundleConfig::default(),
    );
    Setup {
        builder,
        issuer_did,
        issuer_key,
        holder,
        did,
    }
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("offline/build");
    for credentials in [1usize, 8, 32] {
        let s = setup(credentials);
        let request = BuildRequest::new(s.did.clone(), BundleFormat::SelfContained);
        group.bench_with_input(
            BenchmarkId::from_parameter(credentials),
            &request,
            |b, request| {
                b.iter(|| s.builder.build(request).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let s = setup(8);
    let mut encode_group = c.benchmark_group("offline/encode");
    for format in FORMATS {
        let bundle = s
            .builder
            .build(&BuildRequest::new(s.did.clone(), format))
            .unwrap();
        encode_group.bench_with_input(BenchmarkId::from_parameter(format), &bundle, |b, bundle| {
            b.iter(|| encode(bundle).unwrap());
        });
    }
    encode_group.finish();

    let mut decode_group = c.benchmark_group("offline/decode");
    for format in FORMATS {
        let (_, bytes) = s
            .builder
            .build_encoded(&BuildRequest::new(s.did.clone(), format))
            .unwrap();
        decode_group.throughput(Throughput::Bytes(bytes.len() as u64));
        decode_group.bench_with_input(BenchmarkId::from_parameter(format), &bytes, |b, bytes| {
            b.iter(|| decode(bytes, format).unwrap());
        });
    }
    decode_group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let s = setup(8);
    let bundle = s
        .builder
        .build(&BuildRequest::new(s.did.clone(), BundleFormat::SelfContained))
        .unwrap();
    let verifier = OfflineVerifier::new(OfflineVerificationConfig::default())
        .trust_issuer(s.issuer_did.clone(), s.issuer_key.clone());

    let mut group = c.benchmark_group("offline/verify");
    for mode in [
        VerificationMode::Full,
        VerificationMode::Minimal,
        VerificationMode::Emergency,
    ] {
        let mut request = OfflineVerificationRequest::new(s.did.clone(), mode);
        request.challenge = "bench".into();
        request.challenge_response =
            Some(sign_challenge(&IntegrityCodec::standard(), &s.holder, &request).unwrap());
        group.bench_with_input(BenchmarkId::from_parameter(mode), &request, |b, request| {
            b.iter(|| verifier.verify(&bundle, request));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_codec, bench_verify);
criterion_main!(benches);
